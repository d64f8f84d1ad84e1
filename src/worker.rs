//! A single virtual user: the request/think-time loop run by every member
//! of the VU pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::executor::Executor;
use crate::limiter::Limiter;
use crate::metrics::RequestResult;

pub struct Worker {
    id: usize,
    executor: Arc<Executor>,
    results: mpsc::Sender<RequestResult>,
    think_time: Duration,
    limiter: Option<Arc<Limiter>>,
}

impl Worker {
    pub fn new(
        id: usize,
        executor: Arc<Executor>,
        results: mpsc::Sender<RequestResult>,
        think_time: Duration,
        limiter: Option<Arc<Limiter>>,
    ) -> Self {
        Self {
            id,
            executor,
            results,
            think_time,
            limiter,
        }
    }

    /// Issues requests until `cancel` fires. Each iteration: rate-limit
    /// acquisition (no-op without a limiter), endpoint selection, execution,
    /// result emission, optional think-time sleep. Every blocking step
    /// races cancellation.
    ///
    /// An error result observed while `cancel` is already set is a shutdown
    /// artifact (the aborted in-flight request of a stopping worker) and is
    /// dropped instead of recorded.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::debug!(worker = self.id, "worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Some(limiter) = &self.limiter {
                if !limiter.acquire(&cancel).await {
                    break;
                }
            }

            let endpoint = self.executor.select_endpoint();
            let result = self.executor.execute(&cancel, endpoint).await;

            if result.error.is_some() && cancel.is_cancelled() {
                break;
            }

            let delivered = tokio::select! {
                _ = cancel.cancelled() => false,
                sent = self.results.send(result) => sent.is_ok(),
            };
            if !delivered {
                break;
            }

            if !self.think_time.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(self.think_time) => {}
                }
            }
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }
}
