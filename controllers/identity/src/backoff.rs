//! # Exponential Backoff
//!
//! Provides the retry delay schedule for failed reconciliations.
//! Delays double from a base value up to a cap: 5s, 10s, 20s, 40s, ... 300s.
//! The reconciler tracks consecutive failures per resource and gives up
//! (marks the resource Degraded) once the attempt limit is reached.

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each call to `next_backoff_seconds()` returns the current delay and
/// doubles it, capped at `max_secs`. `reset()` returns to the base delay
/// after a successful reconciliation.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Base delay in seconds (for reset)
    base_secs: u64,
    /// Current delay in seconds
    current_secs: u64,
    /// Maximum delay in seconds
    max_secs: u64,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given base and cap in seconds.
    ///
    /// Default schedule for reconciliation errors: 5s base, 300s cap.
    #[must_use]
    pub fn new(base_secs: u64, max_secs: u64) -> Self {
        Self {
            base_secs,
            current_secs: base_secs,
            max_secs,
        }
    }

    /// Get the next delay in seconds and advance the schedule.
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        self.current_secs = std::cmp::min(self.current_secs.saturating_mul(2), self.max_secs);
        result
    }

    /// Get the next delay as a `Duration` and advance the schedule.
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the schedule to the base delay.
    pub fn reset(&mut self) {
        self.current_secs = self.base_secs;
    }

    /// Calculate the delay for a given consecutive error count (stateless).
    ///
    /// `error_count` 0 returns the base delay; each further error doubles
    /// it, capped at `max_secs`.
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, base_secs: u64, max_secs: u64) -> Duration {
        let shifted = if error_count >= 63 {
            max_secs
        } else {
            base_secs.saturating_mul(1u64 << error_count)
        };
        Duration::from_secs(std::cmp::min(shifted, max_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = ExponentialBackoff::new(5, 300);
        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 20);
        assert_eq!(backoff.next_backoff_seconds(), 40);
        assert_eq!(backoff.next_backoff_seconds(), 80);
        assert_eq!(backoff.next_backoff_seconds(), 160);
        assert_eq!(backoff.next_backoff_seconds(), 300);
        // stays at the cap
        assert_eq!(backoff.next_backoff_seconds(), 300);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = ExponentialBackoff::new(5, 300);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.reset();
        assert_eq!(backoff.next_backoff_seconds(), 5);
    }

    #[test]
    fn test_stateless_calculation() {
        assert_eq!(ExponentialBackoff::calculate_for_error_count(0, 5, 300), Duration::from_secs(5));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(1, 5, 300), Duration::from_secs(10));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(4, 5, 300), Duration::from_secs(80));
        assert_eq!(ExponentialBackoff::calculate_for_error_count(10, 5, 300), Duration::from_secs(300));
        // no overflow at absurd counts
        assert_eq!(ExponentialBackoff::calculate_for_error_count(200, 5, 300), Duration::from_secs(300));
    }

    #[test]
    fn test_next_backoff_duration() {
        let mut backoff = ExponentialBackoff::new(5, 300);
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
    }
}
