//! The engine wires everything together: scheduler → dispatcher → executor
//! → collector, with a reporter timer alongside.
//!
//! # Shutdown ordering
//! The ambient [`CancellationToken`] is the single cancellation root. The
//! scheduler task owns the target sender, so the target channel closes
//! exactly when the scheduler exits; the dispatcher drains on that close;
//! result senders are dropped as their holders (the engine, workers,
//! request tasks) finish, which closes the result channel after every
//! producer has quiesced; the drain task exits on that close; only then is
//! the final snapshot taken. Nothing ever writes to a closed channel.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Mode};
use crate::dispatch::{PoolDispatcher, RateDispatcher};
use crate::executor::Executor;
use crate::limiter::Limiter;
use crate::metrics::{Collector, RequestResult, Stats};
use crate::reporter;
use crate::scheduler::Scheduler;
use crate::template::Generator;

const RESULT_CHANNEL_SIZE: usize = 1000;
const TARGET_CHANNEL_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("building http client: {0}")]
    Client(#[from] reqwest::Error),
    /// The per-request error roll-up: raised iff any request failed. Carries
    /// the final snapshot so callers still get the full picture.
    #[error("test completed with {errors} errors out of {total} requests")]
    Failed {
        errors: u64,
        total: u64,
        stats: Box<Stats>,
    },
}

pub struct Engine {
    cfg: Config,
}

impl Engine {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    /// Executes the load test to completion (or ambient cancellation),
    /// printing periodic reports and the final summary on the way. Returns
    /// the final snapshot, as an error when any request failed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Stats, EngineError> {
        let client = self.build_client()?;
        let collector = Arc::new(Collector::new(Instant::now()));
        let generator = Generator::new(self.cfg.variables.clone());
        let executor = Arc::new(Executor::new(
            self.cfg.endpoints.clone(),
            generator,
            client,
        ));

        let (result_tx, mut result_rx) = mpsc::channel::<RequestResult>(RESULT_CHANNEL_SIZE);
        let (target_tx, target_rx) = mpsc::channel::<u32>(TARGET_CHANNEL_SIZE);

        tracing::info!(
            mode = %self.cfg.load.mode,
            stages = self.cfg.load.stages.len(),
            endpoints = self.cfg.endpoints.len(),
            total_duration = ?self.cfg.total_duration(),
            "starting load test"
        );

        // Drain task: the sole writer into the collector. Serializes every
        // producer through one channel.
        let drain = tokio::spawn({
            let collector = Arc::clone(&collector);
            async move {
                while let Some(result) = result_rx.recv().await {
                    collector.record(result);
                }
            }
        });

        // Scheduler task. It owns the target sender: the channel closes when
        // the profile finishes or cancellation lands.
        let sched_done = CancellationToken::new();
        let scheduler = Scheduler::new(self.cfg.load.stages.clone());
        let sched_handle = tokio::spawn({
            let cancel = cancel.clone();
            let done = sched_done.clone();
            async move {
                scheduler.run(cancel, target_tx).await;
                done.cancel();
            }
        });

        // Reporter timer: one snapshot per interval until the run winds down.
        let report_handle = tokio::spawn({
            let collector = Arc::clone(&collector);
            let cancel = cancel.clone();
            let done = sched_done.clone();
            let interval = self.cfg.output.interval;
            async move {
                let mut ticker = time::interval_at(Instant::now() + interval, interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = done.cancelled() => break,
                        _ = ticker.tick() => {
                            let snapshot = collector.snapshot();
                            let mut stdout = std::io::stdout();
                            if let Err(err) = reporter::report(&mut stdout, &snapshot) {
                                tracing::warn!("writing periodic report: {err}");
                            }
                        }
                    }
                }
            }
        });

        // The limiter's filler lives on a child token so a naturally
        // completed run also tears it down.
        let limiter_cancel = cancel.child_token();

        match self.cfg.load.mode {
            Mode::Vu => {
                let limiter =
                    Limiter::new(self.cfg.load.max_rps, limiter_cancel.clone()).map(Arc::new);
                PoolDispatcher::new(
                    Arc::clone(&executor),
                    Arc::clone(&collector),
                    result_tx.clone(),
                    self.cfg.load.think_time,
                    limiter,
                )
                .run(cancel.clone(), target_rx)
                .await;
            }
            Mode::ArrivalRate => {
                RateDispatcher::new(
                    Arc::clone(&executor),
                    Arc::clone(&collector),
                    result_tx.clone(),
                )
                .run(cancel.clone(), target_rx)
                .await;
            }
        }
        limiter_cancel.cancel();

        // The dispatcher has quiesced; release our sender so the result
        // channel closes once any straggling in-flight tasks finish.
        drop(result_tx);

        if let Err(err) = sched_handle.await {
            tracing::error!("scheduler task failed: {err}");
        }
        if let Err(err) = report_handle.await {
            tracing::error!("reporter task failed: {err}");
        }
        if let Err(err) = drain.await {
            tracing::error!("collector drain task failed: {err}");
        }

        let stats = collector.snapshot();

        let mut stdout = std::io::stdout();
        if let Err(err) = reporter::summary(&mut stdout, &stats) {
            tracing::warn!("writing summary: {err}");
        }

        if !self.cfg.output.file.is_empty() {
            match reporter::write_json(&self.cfg.output.file, &stats) {
                Ok(()) => tracing::info!(file = %self.cfg.output.file, "results written"),
                Err(err) => {
                    tracing::warn!("failed to write results file: {err}");
                }
            }
        }

        if stats.error_count > 0 {
            return Err(EngineError::Failed {
                errors: stats.error_count,
                total: stats.total_requests,
                stats: Box::new(stats),
            });
        }
        Ok(stats)
    }

    fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let http = &self.cfg.http;
        let redirect = if http.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        reqwest::Client::builder()
            .timeout(http.timeout)
            .redirect(redirect)
            .danger_accept_invalid_certs(http.insecure_skip_verify)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
    }
}
