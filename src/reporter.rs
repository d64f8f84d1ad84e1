//! Console rendering of snapshots plus the optional JSON export.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use crate::metrics::Stats;

/// Writes the periodic stats table.
pub fn report<W: Write>(w: &mut W, stats: &Stats) -> io::Result<()> {
    let err_pct = if stats.total_requests > 0 {
        stats.error_count as f64 / stats.total_requests as f64 * 100.0
    } else {
        0.0
    };

    writeln!(
        w,
        "\n[ {} ] Active: {}  RPS: {:.1}  Reqs: {}  Errors: {} ({:.1}%)",
        format_elapsed(stats.elapsed),
        stats.active,
        stats.rps,
        stats.total_requests,
        stats.error_count,
        err_pct
    )?;
    writeln!(w, "{}", "─".repeat(65))?;
    writeln!(
        w,
        "{:<30} {:>6}  {:>8}  {:>8}  {:>8}",
        "Endpoint", "Reqs", "p50", "p90", "p99"
    )?;
    writeln!(w, "{}", "─".repeat(65))?;

    for (name, ep) in &stats.per_endpoint {
        writeln!(
            w,
            "{:<30} {:>6}  {:>8}  {:>8}  {:>8}",
            truncate(name, 30),
            ep.total_requests,
            fmt_dur(ep.p50),
            fmt_dur(ep.p90),
            fmt_dur(ep.p99),
        )?;
    }
    writeln!(w, "{}", "─".repeat(65))
}

/// Writes the final summary block.
pub fn summary<W: Write>(w: &mut W, stats: &Stats) -> io::Result<()> {
    writeln!(w, "\n{}", "═".repeat(65))?;
    writeln!(w, "  FINAL SUMMARY")?;
    writeln!(w, "{}", "═".repeat(65))?;
    writeln!(w, "  Duration:       {}", format_elapsed(stats.elapsed))?;
    writeln!(w, "  Total Requests: {}", stats.total_requests)?;
    writeln!(w, "  Success:        {}", stats.success_count)?;
    writeln!(w, "  Errors:         {}", stats.error_count)?;
    writeln!(w, "  Avg RPS:        {:.2}", stats.rps)?;
    writeln!(w, "{}", "─".repeat(65))?;
    writeln!(
        w,
        "  {:<10}  {:>10}  {:>10}  {:>10}  {:>10}",
        "Metric", "p50", "p90", "p95", "p99"
    )?;
    writeln!(w, "{}", "─".repeat(65))?;
    writeln!(
        w,
        "  {:<10}  {:>10}  {:>10}  {:>10}  {:>10}",
        "Latency",
        fmt_dur(stats.p50),
        fmt_dur(stats.p90),
        fmt_dur(stats.p95),
        fmt_dur(stats.p99)
    )?;
    writeln!(
        w,
        "  Min: {}  Max: {}  Avg: {}",
        fmt_dur(stats.min),
        fmt_dur(stats.max),
        fmt_dur(stats.avg)
    )?;

    if !stats.per_endpoint.is_empty() {
        writeln!(w, "{}", "─".repeat(65))?;
        writeln!(w, "  Per-Endpoint:")?;
        writeln!(
            w,
            "  {:<28} {:>6} {:>8} {:>8} {:>8} {:>8}",
            "Endpoint", "Reqs", "p50", "p90", "p99", "Errors"
        )?;
        for (name, ep) in &stats.per_endpoint {
            writeln!(
                w,
                "  {:<28} {:>6} {:>8} {:>8} {:>8} {:>8}",
                truncate(name, 28),
                ep.total_requests,
                fmt_dur(ep.p50),
                fmt_dur(ep.p90),
                fmt_dur(ep.p99),
                ep.error_count,
            )?;
        }
    }
    writeln!(w, "{}", "═".repeat(65))
}

/// Writes the snapshot as pretty-printed JSON.
pub fn write_json(path: impl AsRef<Path>, stats: &Stats) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, stats)?;
    Ok(())
}

fn fmt_dur(d: Duration) -> String {
    if d.is_zero() {
        return "-".to_string();
    }
    if d < Duration::from_millis(1) {
        return format!("{:.1}µs", d.as_secs_f64() * 1e6);
    }
    if d < Duration::from_secs(1) {
        return format!("{:.1}ms", d.as_secs_f64() * 1e3);
    }
    format!("{:.2}s", d.as_secs_f64())
}

fn format_elapsed(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let cut: String = s.chars().take(n - 1).collect();
    format!("{cut}…")
}
