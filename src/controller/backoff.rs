//! # Exponential Backoff
//!
//! Delay sequence for retrying remote writes: each delay doubles the previous
//! one, starting at a configured value and capped at a maximum.
//!
//! ## Usage
//!
//! ```rust
//! use arca_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(2000));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(2000));
//! ```

use crate::config::RetryPolicy;
use std::time::Duration;

/// Doubling backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `initial` and never exceeding `max`
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            current: initial,
            max,
        }
    }

    #[must_use]
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.initial_backoff, policy.max_backoff)
    }

    /// Return the current delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset to the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
