//! Time abstraction for deterministic breaker tests
//!
//! Circuit breakers read monotonic time through [`Clock`] so recovery
//! timeouts can be exercised in tests by advancing a [`MockClock`] instead of
//! sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant used for timeout arithmetic
    fn now(&self) -> Instant;

    /// Wall-clock time used for reporting
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as a UTC timestamp
    fn utc_now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.system_time())
    }
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually driven clock for tests
///
/// Clones share the same elapsed offset, so a clock handed to a breaker can
/// be advanced from the test body.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    wall_start: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            wall_start: SystemTime::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves time forward by `duration`
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Sets the total elapsed offset since creation
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_start + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the clock abstraction

    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
    }

    /// Validates cloned mock clocks share one timeline.
    ///
    /// Assertions:
    /// - Confirms advancing a clone is visible through the original.
    /// - Confirms `now()` and `utc_now()` both move by the advanced amount.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new();
        let handle = clock.clone();
        let start = clock.now();
        let wall = clock.utc_now();

        handle.advance_secs(10);

        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(10));
        assert_eq!((clock.utc_now() - wall).num_seconds(), 10);
    }

    #[test]
    fn test_mock_clock_set_elapsed() {
        let clock = MockClock::new();
        clock.set_elapsed(Duration::from_secs(3));
        clock.set_elapsed(Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }
}
