//! Backoff policy for throttled provider calls.
//!
//! The policy is a plain value handed to the gateway; retry behavior is
//! data, not a callback.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Attempts before the gateway gives up with a retry-limit error.
    pub max_retries: u32,
    /// Upper bound of the random jitter added to every throttle delay.
    pub jitter_ms: u64,
}

impl BackoffPolicy {
    /// Delay before retrying a 429: `max(1, retry_after) * 1000` ms plus
    /// random jitter in `[0, jitter_ms)`.
    pub fn throttle_delay(&self, retry_after_secs: u64) -> Duration {
        #[cfg(feature = "fast-backoff")]
        {
            let _ = retry_after_secs;
            return Duration::from_millis(1);
        }
        #[cfg(not(feature = "fast-backoff"))]
        {
            let base_ms = retry_after_secs.max(1) * 1000;
            let jitter = if self.jitter_ms > 0 {
                rand::rng().random_range(0..self.jitter_ms)
            } else {
                0
            };
            Duration::from_millis(base_ms + jitter)
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            jitter_ms: 250,
        }
    }
}
