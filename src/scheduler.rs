//! Stage scheduler: turns the ramp profile into a stream of integer
//! targets.
//!
//! The scheduler is deliberately decoupled from dispatch: it only walks the
//! configured [`Stage`]s as wall-clock time passes and writes the current
//! target level (VU count or RPS, depending on mode) into a channel whenever
//! the value changes. The dispatcher on the other end decides what a target
//! means.
//!
//! # Interpolation
//! Within a `linear` stage the target is interpolated from the *previous
//! stage's declared target*, never from whatever was last emitted, so
//! rounding artifacts cannot accumulate across stages:
//!
//! ```text
//! pct    = clamp((elapsed - stage_start) / stage.duration, 0, 1)
//! target = round(prev + (stage.target - prev) * pct)
//! ```
//!
//! `step` stages (and zero-duration stages) jump straight to their target.
//!
//! # Termination
//! The run loop wakes every 100 ms, deduplicates emissions (flat stages emit
//! once), and finishes when the profile is exhausted or the ambient token is
//! cancelled. On cancellation a final `0` is sent best-effort so the
//! downstream dispatcher releases its resources; if the dispatcher is not
//! reading, the `0` is dropped rather than blocking shutdown.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{Ramp, Stage};

const TICK: Duration = Duration::from_millis(100);

pub struct Scheduler {
    stages: Vec<Stage>,
}

impl Scheduler {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Drives the profile to completion, sending target changes on `targets`.
    /// The caller owns the channel lifecycle; this function never closes it
    /// explicitly.
    pub async fn run(&self, cancel: CancellationToken, targets: mpsc::Sender<u32>) {
        let start = Instant::now();
        let mut ticker = time::interval(TICK);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut last_sent: Option<u32> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    send_final(&targets, last_sent);
                    return;
                }
                _ = ticker.tick() => {
                    let (target, done) = self.target_at(start.elapsed());
                    if last_sent != Some(target) {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            sent = targets.send(target) => {
                                if sent.is_err() {
                                    return;
                                }
                                last_sent = Some(target);
                            }
                        }
                    }
                    if done {
                        tracing::debug!("ramp profile complete");
                        return;
                    }
                }
            }
        }
    }

    /// Target level at the given elapsed time. `done` is true once the
    /// profile is exhausted (or, within the final stage, exactly at its
    /// end).
    fn target_at(&self, elapsed: Duration) -> (u32, bool) {
        let mut stage_start = Duration::ZERO;
        let mut prev: u32 = 0;

        for (i, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;

            if elapsed <= stage_end {
                let last = i == self.stages.len() - 1;
                let at_end = last && elapsed == stage_end;

                if stage.duration.is_zero() || stage.ramp == Ramp::Step {
                    return (stage.target, at_end);
                }
                let pct = ((elapsed - stage_start).as_secs_f64()
                    / stage.duration.as_secs_f64())
                .clamp(0.0, 1.0);
                let interpolated =
                    (prev as f64 + (stage.target as f64 - prev as f64) * pct).round();
                return (interpolated as u32, at_end);
            }

            prev = stage.target;
            stage_start = stage_end;
        }

        // Past all stages.
        (0, true)
    }
}

/// Best-effort 0 for graceful shutdown. Non-blocking: the token is already
/// cancelled and nothing downstream is guaranteed to be reading.
fn send_final(targets: &mpsc::Sender<u32>, last_sent: Option<u32>) {
    if last_sent == Some(0) {
        return;
    }
    let _ = targets.try_send(0);
}
