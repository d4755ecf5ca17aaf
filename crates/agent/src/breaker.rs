//! Circuit breaker for consecutive task failures.
//!
//! The supervisor feeds it completed self-directed task outcomes; once the
//! failure streak reaches the threshold the breaker opens and self-directed
//! dispatch stops until an operator (or a successful user task) resets it.
//! Zero-round API failures are infrastructure trouble and must not be fed
//! to the breaker at all.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::warn;

pub struct CircuitBreaker {
    threshold: u32,
    consecutive: AtomicU32,
    open: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    /// Record a failure. Returns true when this failure tripped the breaker.
    pub fn record_failure(&self) -> bool {
        let streak = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.threshold && !self.open.swap(true, Ordering::SeqCst) {
            warn!(streak, threshold = self.threshold, "Circuit breaker opened");
            return true;
        }
        false
    }

    /// Record a success. Clears the streak but not an already-open breaker:
    /// once open it stays open until reset.
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn failure_streak(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_at_threshold() {
        let breaker = CircuitBreaker::new(3);
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(!breaker.is_open());
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
        // Already open: no second trip signal.
        assert!(!breaker.record_failure());
    }

    #[test]
    fn success_clears_streak_before_trip() {
        let breaker = CircuitBreaker::new(3);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_streak(), 0);
        assert!(!breaker.record_failure());
        assert!(!breaker.is_open());
    }

    #[test]
    fn open_breaker_requires_reset() {
        let breaker = CircuitBreaker::new(1);
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(breaker.is_open());
        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_streak(), 0);
    }
}
