//! Per-key rate limiting for work queue retries.

use crate::backoff::ExponentialBackoff;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Decides how long a failed key waits before it is re-queued.
pub trait RateLimiter: Send + Sync {
    /// Records a failure for `key` and returns the delay before its retry.
    fn when(&self, key: &str) -> Duration;

    /// Clears the failure history of `key`.
    fn forget(&self, key: &str);

    /// Number of failures recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &str) -> u32;
}

/// Exponential per-key backoff: `base * 2^failures`, capped.
#[derive(Debug, Default)]
pub struct ExponentialFailureRateLimiter {
    backoff: ExponentialBackoff,
    /// Failure count per key (key -> consecutive failures)
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialFailureRateLimiter {
    /// Creates a rate limiter with the given base and maximum delay.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(base, max),
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ExponentialFailureRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = self.backoff.calculate_for_failure_count(*count);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
