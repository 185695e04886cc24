//! Retry decisions and the shared cool-down primitive.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::{BackoffStrategy, OrchestratorConfig};
use crate::generation::FailureKind;

/// Whether a failed attempt should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Pure retry policy: attempts so far and the last failure decide the next step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub strategy: BackoffStrategy,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            strategy: BackoffStrategy::Fixed,
            max_delay: delay,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            strategy: config.backoff,
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }

    /// Decide after `attempt_count` failed attempts.
    ///
    /// A `Retry-After` hint can stretch the delay, but never past the
    /// larger of `max_delay` and `base_delay`.
    pub fn decide(&self, attempt_count: u32, last_failure: &FailureKind) -> RetryDecision {
        if attempt_count >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.delay_for(attempt_count);
        if let FailureKind::RateLimited {
            retry_after: Some(retry_after),
        } = last_failure
        {
            delay = delay.max((*retry_after).min(self.max_delay.max(self.base_delay)));
        }
        RetryDecision::Retry { delay }
    }

    /// Delay before the attempt following `attempt_count` failures.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exponent = attempt_count.saturating_sub(1).min(31);
                self.base_delay
                    .checked_mul(1u32 << exponent)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        }
    }
}

/// Suspend for `duration` unless `cancel` fires first.
///
/// Returns `false` when the wait was cut short by cancellation.
pub async fn cool_down(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
