//! Exponential-backoff retry policy for failed provider sends.

use std::time::Duration;

use crate::types::Timestamp;

/// Tunable parameters for re-arming a dispatch after a provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before the dispatch becomes a terminal error.
    pub max_retries: i32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Whether a dispatch with `retry_count` recorded failures is out of
    /// attempts.
    pub fn is_exhausted(&self, retry_count: i32) -> bool {
        retry_count > self.max_retries
    }

    /// Delay before the next attempt after `retry_count` failures.
    ///
    /// Doubles per failure starting at [`RetryPolicy::base_delay`] and is
    /// clamped to [`RetryPolicy::max_delay`].
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 31) as u32;
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Wall-clock time of the next attempt.
    pub fn next_attempt_at(&self, now: Timestamp, retry_count: i32) -> Timestamp {
        let delay = chrono::Duration::from_std(self.backoff(retry_count))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.max_delay.as_secs() as i64));
        now + delay
    }
}
