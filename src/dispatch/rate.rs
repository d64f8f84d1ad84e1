//! Open-loop arrival-rate dispatch: request starts are driven by a clock,
//! never by prior completions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::executor::Executor;
use crate::metrics::{Collector, RequestResult};

pub struct RateDispatcher {
    executor: Arc<Executor>,
    collector: Arc<Collector>,
    results: mpsc::Sender<RequestResult>,
}

impl RateDispatcher {
    pub fn new(
        executor: Arc<Executor>,
        collector: Arc<Collector>,
        results: mpsc::Sender<RequestResult>,
    ) -> Self {
        Self {
            executor,
            collector,
            results,
        }
    }

    /// Consumes the target stream as RPS values, replacing the dispatcher
    /// task on every change. When the stream closes, the last dispatcher is
    /// cancelled and joined; requests already in flight finish under the
    /// ambient token and report (or are suppressed) on their own.
    pub async fn run(self, ambient: CancellationToken, mut targets: mpsc::Receiver<u32>) {
        let mut current: Option<(CancellationToken, JoinHandle<()>)> = None;

        while let Some(rate) = targets.recv().await {
            self.set_rate(&ambient, &mut current, rate).await;
        }
        stop(&mut current).await;
    }

    async fn set_rate(
        &self,
        ambient: &CancellationToken,
        current: &mut Option<(CancellationToken, JoinHandle<()>)>,
        rate: u32,
    ) {
        // The previous dispatcher must be fully gone before the new one
        // starts, or two tickers would overlap.
        stop(current).await;

        if rate == 0 {
            self.collector.set_active(0);
            return;
        }

        tracing::debug!(rate, "dispatching at new arrival rate");

        // 2x the target rate bounds in-flight work: at steady state roughly
        // `rate` requests are in flight, and the headroom absorbs response
        // time spikes without unbounded fan-out.
        let capacity = rate as usize * 2;
        let in_flight = Arc::new(Semaphore::new(capacity));
        let interval = Duration::from_secs_f64(1.0 / rate as f64);

        let cancel = ambient.child_token();
        let task = {
            let cancel = cancel.clone();
            let ambient = ambient.clone();
            let executor = Arc::clone(&self.executor);
            let collector = Arc::clone(&self.collector);
            let results = self.results.clone();

            tokio::spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = ticker.tick() => {
                            let Ok(permit) = Arc::clone(&in_flight).try_acquire_owned() else {
                                // Saturated: the target rate exceeds what the
                                // system under test absorbs. Drop the tick;
                                // queuing here would unbound memory.
                                continue;
                            };
                            collector.set_active(capacity - in_flight.available_permits());

                            let ambient = ambient.clone();
                            let executor = Arc::clone(&executor);
                            let results = results.clone();
                            tokio::spawn(async move {
                                let endpoint = executor.select_endpoint();
                                // Run under the ambient token: a rate change
                                // must not abort requests already in flight.
                                let result = executor.execute(&ambient, endpoint).await;
                                if result.error.is_some() && ambient.is_cancelled() {
                                    return;
                                }
                                tokio::select! {
                                    _ = ambient.cancelled() => {}
                                    _ = results.send(result) => {}
                                }
                                drop(permit);
                            });
                        }
                    }
                }
            })
        };

        *current = Some((cancel, task));
    }
}

async fn stop(current: &mut Option<(CancellationToken, JoinHandle<()>)>) {
    if let Some((cancel, handle)) = current.take() {
        cancel.cancel();
        if let Err(err) = handle.await {
            tracing::error!("rate dispatcher task failed: {err}");
        }
    }
}
