//! # Fibonacci Backoff
//!
//! Progressive retry intervals for reconciliation errors.
//!
//! The sequence grows as 1, 1, 2, 3, 5, 8, ... times the base unit and is
//! capped at the configured maximum. Each resource keeps its own instance so
//! one failing object never slows down another.

/// Fibonacci backoff measured in minutes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibonacciBackoff {
    max_minutes: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_minutes` and capped at `max_minutes`
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        let min_minutes = min_minutes.max(1);
        Self {
            max_minutes: max_minutes.max(min_minutes),
            previous: 0,
            current: min_minutes,
        }
    }

    /// Return the next backoff in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let minutes = self.current.min(self.max_minutes);
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next;
        minutes * 60
    }
}
