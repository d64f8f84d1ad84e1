//! Per-request results and the concurrent metrics collector.
//!
//! The collector stores raw, mergeable data (durations, counters) and defers
//! every derived statistic to snapshot time: a [`Stats`] is computed from
//! private copies under the lock, sorted once, and handed out as an
//! independent value. Snapshot cost is O(n log n) per endpoint, but snapshots
//! happen once per reporter interval, so the trade for a single simple mutex
//! is a good one. The fast path, `record`, is an O(1) map lookup plus an
//! append.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Outcome of a single HTTP request. A transport-level failure carries
/// `status` 0 and a message in `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResult {
    pub endpoint: String,
    pub status: u16,
    pub duration: Duration,
    pub bytes: u64,
    pub error: Option<String>,
    pub timestamp: SystemTime,
    pub success: bool,
}

/// Aggregated metrics for one endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointStats {
    pub name: String,
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_bytes: u64,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
}

/// A point-in-time snapshot of everything collected so far. Independent of
/// the collector: safe to keep, print or serialize after the run ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Cumulative requests per second since the run started, not an
    /// instantaneous rate.
    pub rps: f64,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub per_endpoint: BTreeMap<String, EndpointStats>,
    /// Current worker count in VU mode, in-flight request count in
    /// arrival-rate mode.
    pub active: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct EndpointData {
    durations: Vec<Duration>,
    successes: u64,
    errors: u64,
    bytes: u64,
}

#[derive(Default)]
struct Inner {
    endpoints: HashMap<String, EndpointData>,
    active: usize,
}

/// Thread-safe result sink. One mutex guards the accumulator map and the
/// active level; writers never hold it across await points.
pub struct Collector {
    start: Instant,
    inner: Mutex<Inner>,
}

impl Collector {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record(&self, result: RequestResult) {
        let mut inner = self.inner.lock().expect("collector lock");
        let data = inner.endpoints.entry(result.endpoint).or_default();
        data.durations.push(result.duration);
        data.bytes += result.bytes;
        if result.success {
            data.successes += 1;
        } else {
            data.errors += 1;
        }
    }

    /// Updates the reported active level (worker count or in-flight count).
    pub fn set_active(&self, n: usize) {
        self.inner.lock().expect("collector lock").active = n;
    }

    /// Computes a [`Stats`] snapshot. Sorting happens on private copies; the
    /// lock is released before the snapshot is returned.
    pub fn snapshot(&self) -> Stats {
        let inner = self.inner.lock().expect("collector lock");

        let elapsed = self.start.elapsed();
        let mut stats = Stats {
            elapsed,
            active: inner.active,
            ..Stats::default()
        };

        let mut all_durations = Vec::new();

        for (name, data) in &inner.endpoints {
            let total = data.successes + data.errors;
            let mut endpoint = EndpointStats {
                name: name.clone(),
                total_requests: total,
                success_count: data.successes,
                error_count: data.errors,
                total_bytes: data.bytes,
                ..EndpointStats::default()
            };
            if !data.durations.is_empty() {
                let mut sorted = data.durations.clone();
                sorted.sort_unstable();
                fill_latencies(&mut endpoint, &sorted);
                all_durations.extend_from_slice(&data.durations);
            }
            stats.per_endpoint.insert(name.clone(), endpoint);
            stats.total_requests += total;
            stats.success_count += data.successes;
            stats.error_count += data.errors;
        }

        if !all_durations.is_empty() {
            all_durations.sort_unstable();
            stats.p50 = percentile(&all_durations, 50.0);
            stats.p90 = percentile(&all_durations, 90.0);
            stats.p95 = percentile(&all_durations, 95.0);
            stats.p99 = percentile(&all_durations, 99.0);
            stats.min = all_durations[0];
            stats.max = all_durations[all_durations.len() - 1];
            stats.avg = average(&all_durations);
        }

        if elapsed.as_secs_f64() > 0.0 {
            stats.rps = stats.total_requests as f64 / elapsed.as_secs_f64();
        }

        stats
    }
}

fn fill_latencies(stats: &mut EndpointStats, sorted: &[Duration]) {
    stats.p50 = percentile(sorted, 50.0);
    stats.p90 = percentile(sorted, 90.0);
    stats.p95 = percentile(sorted, 95.0);
    stats.p99 = percentile(sorted, 99.0);
    stats.min = sorted[0];
    stats.max = sorted[sorted.len() - 1];
    stats.avg = average(sorted);
}

/// Nearest-rank percentile on a sorted sample: index `floor((L-1) * p / 100)`.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() - 1) as f64 * p / 100.0) as usize;
    sorted[idx]
}

fn average(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let sum: Duration = durations.iter().sum();
    sum / durations.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn result(endpoint: &str, millis: u64, success: bool) -> RequestResult {
        RequestResult {
            endpoint: endpoint.to_string(),
            status: if success { 200 } else { 500 },
            duration: Duration::from_millis(millis),
            bytes: 10,
            error: (!success).then(|| "boom".to_string()),
            timestamp: SystemTime::now(),
            success,
        }
    }

    #[test]
    fn record_accumulates_totals() {
        let c = Collector::new(Instant::now());
        c.record(result("a", 5, true));
        c.record(result("a", 7, true));

        let stats = c.snapshot();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.per_endpoint["a"].total_bytes, 20);
    }

    #[test]
    fn record_splits_successes_and_errors() {
        let c = Collector::new(Instant::now());
        c.record(result("a", 5, true));
        c.record(result("a", 5, false));
        c.record(result("a", 5, false));

        let stats = c.snapshot();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 2);
        // Errors with a measured duration count towards latencies.
        assert_eq!(stats.per_endpoint["a"].total_requests, 3);
    }

    #[test]
    fn percentiles_on_known_dataset() {
        let c = Collector::new(Instant::now());
        for ms in 1..=100 {
            c.record(result("x", ms, true));
        }

        let stats = c.snapshot();
        assert_eq!(stats.p50, Duration::from_millis(50));
        assert_eq!(stats.p90, Duration::from_millis(90));
        assert_eq!(stats.p95, Duration::from_millis(95));
        assert_eq!(stats.p99, Duration::from_millis(99));
        assert_eq!(stats.min, Duration::from_millis(1));
        assert_eq!(stats.max, Duration::from_millis(100));

        let ep = &stats.per_endpoint["x"];
        assert_eq!(ep.p50, Duration::from_millis(50));
        assert_eq!(ep.p99, Duration::from_millis(99));
    }

    #[test]
    fn snapshot_is_order_independent() {
        let ordered = Collector::new(Instant::now());
        let shuffled = Collector::new(Instant::now());

        let durations: Vec<u64> = (1..=50).collect();
        for &ms in &durations {
            ordered.record(result("x", ms, true));
        }
        // Record the same multiset in a scrambled order.
        let mut scrambled = durations.clone();
        scrambled.reverse();
        scrambled.swap(3, 40);
        scrambled.swap(11, 29);
        for &ms in &scrambled {
            shuffled.record(result("x", ms, true));
        }

        let a = ordered.snapshot();
        let b = shuffled.snapshot();
        assert_eq!(a.p50, b.p50);
        assert_eq!(a.p90, b.p90);
        assert_eq!(a.p95, b.p95);
        assert_eq!(a.p99, b.p99);
        assert_eq!(a.min, b.min);
        assert_eq!(a.max, b.max);
        assert_eq!(a.avg, b.avg);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        let c = Arc::new(Collector::new(Instant::now()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = Arc::clone(&c);
            handles.push(std::thread::spawn(move || {
                for i in 0u64..250 {
                    c.record(result("x", i % 20 + 1, true));
                }
            }));
        }
        for h in handles {
            h.join().expect("thread");
        }

        let stats = c.snapshot();
        assert_eq!(stats.total_requests, 1000);
        assert_eq!(stats.success_count, 1000);
    }

    #[test]
    fn rps_is_cumulative() {
        let c = Collector::new(Instant::now() - Duration::from_secs(2));
        for _ in 0..100 {
            c.record(result("x", 1, true));
        }

        let stats = c.snapshot();
        // 100 requests over ~2s.
        assert!(stats.rps > 40.0 && stats.rps < 60.0, "rps = {}", stats.rps);
    }

    #[test]
    fn per_endpoint_totals_sum_to_global() {
        let c = Collector::new(Instant::now());
        c.record(result("a", 5, true));
        c.record(result("a", 6, false));
        c.record(result("b", 7, true));
        c.record(result("b", 8, true));
        c.record(result("b", 9, true));

        let stats = c.snapshot();
        assert_eq!(stats.per_endpoint.len(), 2);
        let sum: u64 = stats
            .per_endpoint
            .values()
            .map(|e| e.total_requests)
            .sum();
        assert_eq!(stats.total_requests, sum);
        for ep in stats.per_endpoint.values() {
            assert_eq!(ep.total_requests, ep.success_count + ep.error_count);
        }
    }

    #[test]
    fn active_level_is_reported() {
        let c = Collector::new(Instant::now());
        c.set_active(7);
        assert_eq!(c.snapshot().active, 7);
        c.set_active(0);
        assert_eq!(c.snapshot().active, 0);
    }

    #[test]
    fn empty_snapshot_is_all_zeros() {
        let c = Collector::new(Instant::now());
        let stats = c.snapshot();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.rps, 0.0);
        assert_eq!(stats.p99, Duration::ZERO);
        assert_eq!(stats.min, Duration::ZERO);
        assert!(stats.per_endpoint.is_empty());
    }

    #[test]
    fn stats_round_trip_through_json() {
        let c = Collector::new(Instant::now());
        for ms in 1..=100 {
            c.record(result("x", ms, ms % 10 != 0));
        }
        c.set_active(3);
        let stats = c.snapshot();

        let encoded = serde_json::to_string(&stats).expect("encode");
        let decoded: Stats = serde_json::from_str(&encoded).expect("decode");

        assert_eq!(decoded.total_requests, stats.total_requests);
        assert_eq!(decoded.success_count, stats.success_count);
        assert_eq!(decoded.error_count, stats.error_count);
        assert_eq!(decoded.p50, stats.p50);
        assert_eq!(decoded.p99, stats.p99);
        assert_eq!(decoded.avg, stats.avg);
        assert_eq!(decoded.active, stats.active);
        assert_eq!(
            decoded.per_endpoint["x"].total_requests,
            stats.per_endpoint["x"].total_requests
        );
    }
}
