//! Retry policy: pure data consulted per chunk attempt, not per batch.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Whether attempt `attempt` may retry after the given error. The
    /// default policy does not inspect the error at all; a future
    /// implementation may classify retryable vs. terminal errors without
    /// changing this signature.
    pub fn should_retry(&self, attempt: u32, _error: &anyhow::Error) -> bool {
        attempt < self.max_attempts
    }

    /// `min(2^attempt * multiplier, 60s)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt as i32) * self.backoff_multiplier;
        Duration::from_secs_f64(exp.min(60.0))
    }
}
