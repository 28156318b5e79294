//! # Exponential Backoff
//!
//! Provides the capped exponential backoff used to delay retries of failed
//! work items.
//!
//! The delay doubles with every consecutive failure of the same key:
//! 5ms, 10ms, 20ms, 40ms, ... up to 1000s with the default settings.

use std::time::Duration;

/// Default delay for the first retry of a key.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default upper bound for any retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
///
/// Stateless: the caller supplies the number of consecutive failures and
/// gets back `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay for the first failure
    base: Duration,
    /// Maximum delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given base and maximum delays
    ///
    /// # Arguments
    ///
    /// * `base` - Delay returned for a failure count of 0
    /// * `max` - Cap for every returned delay
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Calculate the backoff duration for a given failure count
    ///
    /// `failures` is the number of failures recorded *before* this one
    /// (0-indexed), so the first retry waits exactly `base`.
    /// Overflowing intermediate values saturate to `max`.
    #[must_use]
    pub fn calculate_for_failure_count(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures);
        match factor.and_then(|factor| self.base.checked_mul(factor)) {
            Some(delay) => delay.min(self.max),
            None => self.max,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
