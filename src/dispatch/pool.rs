//! The VU pool: keeps exactly as many live workers as the scheduler's
//! current target.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::executor::Executor;
use crate::limiter::Limiter;
use crate::metrics::{Collector, RequestResult};
use crate::worker::Worker;

struct WorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PoolDispatcher {
    executor: Arc<Executor>,
    collector: Arc<Collector>,
    results: mpsc::Sender<RequestResult>,
    think_time: Duration,
    limiter: Option<Arc<Limiter>>,
}

impl PoolDispatcher {
    pub fn new(
        executor: Arc<Executor>,
        collector: Arc<Collector>,
        results: mpsc::Sender<RequestResult>,
        think_time: Duration,
        limiter: Option<Arc<Limiter>>,
    ) -> Self {
        Self {
            executor,
            collector,
            results,
            think_time,
            limiter,
        }
    }

    /// Consumes the target stream, resizing the pool on every value. When
    /// the stream closes (scheduler finished or cancelled), drains the pool
    /// to zero before returning.
    pub async fn run(self, ambient: CancellationToken, mut targets: mpsc::Receiver<u32>) {
        let mut workers: Vec<WorkerHandle> = Vec::new();
        let mut next_id = 0usize;

        while let Some(target) = targets.recv().await {
            self.resize(&ambient, &mut workers, &mut next_id, target as usize)
                .await;
        }
        self.resize(&ambient, &mut workers, &mut next_id, 0).await;
    }

    /// Grows by spawning workers under fresh sub-tokens; shrinks by
    /// cancelling the tail workers and waiting for each to acknowledge
    /// before the count updates: an immediate follow-up resize must never
    /// double-count or leave zombies behind.
    async fn resize(
        &self,
        ambient: &CancellationToken,
        workers: &mut Vec<WorkerHandle>,
        next_id: &mut usize,
        target: usize,
    ) {
        let current = workers.len();

        if target > current {
            tracing::debug!(from = current, to = target, "growing worker pool");
            for _ in current..target {
                // A per-worker child token lets us stop this worker alone;
                // cancelling the ambient root still stops everyone.
                let cancel = ambient.child_token();
                let worker = Worker::new(
                    *next_id,
                    Arc::clone(&self.executor),
                    self.results.clone(),
                    self.think_time,
                    self.limiter.clone(),
                );
                *next_id += 1;
                let handle = tokio::spawn(worker.run(cancel.clone()));
                workers.push(WorkerHandle { cancel, handle });
            }
        } else if target < current {
            tracing::debug!(from = current, to = target, "shrinking worker pool");
            let removed = workers.split_off(target);
            for worker in &removed {
                worker.cancel.cancel();
            }
            for joined in join_all(removed.into_iter().map(|w| w.handle)).await {
                if let Err(err) = joined {
                    tracing::error!("worker task failed: {err}");
                }
            }
        }

        self.collector.set_active(workers.len());
    }
}
