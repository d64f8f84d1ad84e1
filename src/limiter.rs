//! Token-bucket rate limiter for capping the VU pool's aggregate request
//! rate.
//!
//! A filler task deposits one token per `1/rps` interval into a semaphore,
//! capped at `burst = max(1, floor(rps))`. A saturated bucket drops the
//! token, so a long-idle run cannot release a thundering herd. The filler is
//! the sole depositor; acquirers `forget` their permits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct Limiter {
    tokens: Arc<Semaphore>,
}

impl Limiter {
    /// Builds a limiter allowing `rps` requests per second, or `None` when
    /// `rps <= 0` (no limiting). The filler task exits when `cancel` fires.
    pub fn new(rps: f64, cancel: CancellationToken) -> Option<Limiter> {
        if rps <= 0.0 {
            return None;
        }

        let burst = (rps.floor() as usize).max(1);
        let tokens = Arc::new(Semaphore::new(0));
        let interval = Duration::from_secs_f64(1.0 / rps);

        let bucket = Arc::clone(&tokens);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if bucket.available_permits() < burst {
                            bucket.add_permits(1);
                        }
                    }
                }
            }
        });

        Some(Limiter { tokens })
    }

    /// Consumes one token, waiting for the filler if the bucket is empty.
    /// Returns `false` if `cancel` fired before a token became available.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            permit = self.tokens.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_rate_means_unlimited() {
        let cancel = CancellationToken::new();
        assert!(Limiter::new(0.0, cancel.clone()).is_none());
        assert!(Limiter::new(-5.0, cancel).is_none());
    }

    #[tokio::test]
    async fn acquire_returns_token() {
        let cancel = CancellationToken::new();
        let limiter = Limiter::new(100.0, cancel.clone()).expect("limiter");
        assert!(limiter.acquire(&cancel).await);
    }

    #[tokio::test]
    async fn cancelled_acquire_returns_false() {
        let cancel = CancellationToken::new();
        // One token per 10 minutes: the first acquire must block until cancel.
        let limiter = Limiter::new(1.0 / 600.0, cancel.clone()).expect("limiter");

        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { limiter.acquire(&waiter).await });

        time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let acquired = handle.await.expect("join");
        assert!(!acquired);
    }

    #[tokio::test]
    async fn acquisition_rate_tracks_configured_rate() {
        let cancel = CancellationToken::new();
        let limiter = Limiter::new(100.0, cancel.clone()).expect("limiter");

        let counter_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut n = 0u32;
            while limiter.acquire(&counter_cancel).await {
                n += 1;
            }
            n
        });

        time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        let n = handle.await.expect("join");

        // ~30 tokens over 300ms at 100 rps; generous slack for scheduler
        // jitter in CI.
        assert!((15..=60).contains(&n), "acquired {n} tokens");
    }
}
