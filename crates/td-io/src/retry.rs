//! # Retry State Machine
//!
//! Exponential backoff with jitter, expressed as an explicit state so the
//! schedule and the terminal error can be tested without any I/O.

use crate::transport::TransportError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use td_core::{PlatformId, QueryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per page, first try included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.exponential_base.powi(retry.saturating_sub(1) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, with jitter in `[0.5, 1.5)` when
    /// enabled, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, PartialEq)]
pub enum RetryDecision {
    /// Sleep `delay`, then make attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Give up with this error.
    Fail(QueryError),
}

/// Attempt bookkeeping for one page request.
#[derive(Debug)]
pub struct RetryState<'p> {
    platform: PlatformId,
    policy: &'p RetryPolicy,
    attempts: u32,
}

impl<'p> RetryState<'p> {
    pub fn new(platform: PlatformId, policy: &'p RetryPolicy) -> Self {
        Self {
            platform,
            policy,
            attempts: 0,
        }
    }

    /// Record that an attempt is starting.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Classify the failure of the attempt just made.
    pub fn on_failure(&mut self, error: &TransportError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Fail(QueryError::UpstreamRejected {
                platform: self.platform,
                reason: error.to_string(),
            });
        }
        if self.attempts >= self.policy.max_attempts.max(1) {
            return RetryDecision::Fail(QueryError::UpstreamUnavailable {
                platform: self.platform,
                attempts: self.attempts,
                last_error: error.to_string(),
            });
        }
        RetryDecision::Retry {
            attempt: self.attempts + 1,
            delay: self.policy.delay_for(self.attempts),
        }
    }
}
