//! # Token Bucket
//!
//! One bucket per platform, shared by every concurrent query against that
//! platform. A token is taken before each page request, retries included.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use td_core::{PlatformId, QueryError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Bucket capacity; also the initial fill.
    pub burst: u32,
    /// Longest a single acquire may wait before giving up.
    pub max_wait: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            refill_per_sec: 10.0,
            burst: 10,
            max_wait: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    platform: PlatformId,
    limit: RateLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(platform: PlatformId, limit: RateLimit) -> Self {
        Self {
            platform,
            limit,
            state: Mutex::new(BucketState {
                tokens: limit.burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available; otherwise report how long until
    /// the next one is due.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        let capacity = self.limit.burst as f64;
        state.tokens = (state.tokens + elapsed * self.limit.refill_per_sec).min(capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let missing = 1.0 - state.tokens;
        Err(Duration::try_from_secs_f64(missing / self.limit.refill_per_sec)
            .unwrap_or(Duration::MAX))
    }

    /// Wait for a token, bounded by `max_wait` and the cancellation token.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), QueryError> {
        let started = Instant::now();
        let deadline = started.checked_add(self.limit.max_wait);

        loop {
            if cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }

            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let now = Instant::now();
            let wake = now.checked_add(wait);
            let exceeded = match (wake, deadline) {
                (Some(wake), Some(deadline)) => wake > deadline,
                (None, Some(_)) => true,
                (_, None) => false,
            };
            if exceeded {
                let waited = now.saturating_duration_since(started);
                tracing::warn!(
                    "{} rate limit: no token within {:?} (waited {:?})",
                    self.platform,
                    self.limit.max_wait,
                    waited
                );
                return Err(QueryError::RateLimitExceeded {
                    platform: self.platform,
                    waited_ms: waited.as_millis() as u64,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueryError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(refill_per_sec: f64, burst: u32, max_wait_ms: u64) -> RateLimit {
        RateLimit {
            refill_per_sec,
            burst,
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let bucket = TokenBucket::new(PlatformId::Gsc, limit(2.0, 2, 0));
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(PlatformId::Ga4, limit(4.0, 1, 1_000));
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();

        let before = Instant::now();
        bucket.acquire(&cancel).await.unwrap();
        assert!(Instant::now() - before >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_gives_up_after_max_wait() {
        let bucket = TokenBucket::new(PlatformId::Gsc, limit(0.5, 1, 100));
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();

        let err = bucket.acquire(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::RateLimitExceeded {
                platform: PlatformId::Gsc,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_refill_never_blocks_forever() {
        let bucket = TokenBucket::new(PlatformId::Gsc, limit(0.0, 1, 50));
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();
        assert!(bucket.acquire(&cancel).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let bucket = TokenBucket::new(PlatformId::Ga4, limit(0.1, 1, 60_000));
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        assert_eq!(bucket.acquire(&cancel).await, Err(QueryError::Cancelled));
    }
}
