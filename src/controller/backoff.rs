//! # Exponential Backoff
//!
//! Per-resource retry delays for failed reconcile passes.
//!
//! Each failure doubles the delay, starting from `start` and capped at `max`.
//! A successful pass resets the sequence.
//!
//! ## Usage
//!
//! ```rust
//! use riff_system_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(8));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start: Duration,
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff that starts at `start` and never exceeds `max`
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            current: start,
            max,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = std::cmp::min(self.current, self.max);
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.start;
    }
}

/// Backoff state tracked per resource key (`namespace/name`)
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(start, max),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(30));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(30));

        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(20));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
        // Should stay at max
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.next_backoff();

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_state_per_resource() {
        let mut first = BackoffState::new(Duration::from_secs(1), Duration::from_secs(60));
        let mut second = BackoffState::new(Duration::from_secs(1), Duration::from_secs(60));

        first.increment_error();
        first.increment_error();
        assert_eq!(first.backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(first.backoff.next_backoff(), Duration::from_secs(2));

        second.increment_error();
        assert_eq!(second.backoff.next_backoff(), Duration::from_secs(1));

        first.reset();
        assert_eq!(first.error_count, 0);
        assert_eq!(first.backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(second.error_count, 1);
        assert_eq!(second.backoff.next_backoff(), Duration::from_secs(2));
    }
}
