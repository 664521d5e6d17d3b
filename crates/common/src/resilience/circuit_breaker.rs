//! Per-destination circuit breaker
//!
//! A breaker starts **Closed** and lets calls through. Once consecutive
//! failures reach `failure_threshold` it **Opens** and rejects calls until
//! `recovery_timeout` has passed since the last failure, at which point the
//! next `can_execute()` moves it to **Half-Open** and lets probes through.
//! In Half-Open a single failure reopens it and `success_threshold`
//! successes close it again.
//!
//! Successes in the Closed state erode the failure count by one rather than
//! clearing it, so intermittent failures accumulate slowly.
//!
//! All state, the thresholds included, lives in one mutex-guarded struct,
//! so every operation observes and produces a consistent state and
//! [`CircuitBreaker::reconfigure`] takes effect on the shared instance.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use crate::collections::BoundedWindow;
use crate::utils::serde::duration_millis;

/// Number of recent outcomes kept for success-rate reporting
pub const OUTCOME_WINDOW: usize = 100;

/// Invalid breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerConfigError {
    #[error("{field} must be greater than 0")]
    ZeroThreshold { field: &'static str },

    #[error("recovery_timeout must be greater than 0")]
    ZeroRecoveryTimeout,
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls allowed
    Closed,
    /// Calls rejected until the recovery timeout elapses
    Open,
    /// Probing whether the destination recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker thresholds and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures that open a closed breaker
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls after its last failure
    #[serde(with = "duration_millis")]
    pub recovery_timeout: Duration,
    /// Half-open successes required to close
    pub success_threshold: u32,
    /// Advisory per-call deadline; enforced by the executor, not the breaker
    #[serde(with = "duration_millis")]
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), BreakerConfigError> {
        if self.failure_threshold == 0 {
            return Err(BreakerConfigError::ZeroThreshold { field: "failure_threshold" });
        }
        if self.success_threshold == 0 {
            return Err(BreakerConfigError::ZeroThreshold { field: "success_threshold" });
        }
        if self.recovery_timeout.is_zero() {
            return Err(BreakerConfigError::ZeroRecoveryTimeout);
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, BreakerConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Dashboard view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub call_count: u64,
    /// Fraction of successful outcomes in the rolling window (1.0 when empty)
    pub success_rate: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    call_count: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    outcomes: BoundedWindow<bool>,
}

impl BreakerState {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            call_count: 0,
            last_failure: None,
            last_failure_at: None,
            outcomes: BoundedWindow::new(OUTCOME_WINDOW),
        }
    }

    fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        self.outcomes.count_where(|ok| *ok) as f64 / self.outcomes.len() as f64
    }
}

/// Circuit breaker guarding one destination
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    inner: Mutex<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, BreakerConfigError> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Creates a breaker reading time from `clock`
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Result<Self, BreakerConfigError> {
        config.validate()?;
        Ok(Self::from_validated(name, config, clock))
    }

    pub(crate) fn from_validated(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Self {
        Self { name: name.into(), inner: Mutex::new(BreakerState::new(config)), clock }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.lock().config.clone()
    }

    /// Swap in new thresholds, keeping the current state and counters
    ///
    /// # Errors
    /// Returns the validation error and leaves the breaker unchanged when
    /// `config` is invalid.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) -> Result<(), BreakerConfigError> {
        config.validate()?;
        self.inner.lock().config = config;
        info!(breaker = %self.name, "circuit breaker reconfigured");
        Ok(())
    }

    /// Whether a call may proceed
    ///
    /// An open breaker whose recovery timeout has elapsed transitions to
    /// Half-Open here and resets its success count.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = inner.last_failure.map_or(true, |at| {
                    self.clock.now().saturating_duration_since(at) >= inner.config.recovery_timeout
                });
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(breaker = %self.name, "circuit breaker half-open, probing recovery");
                }
                recovered
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.call_count += 1;
        inner.outcomes.push(true);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= inner.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    info!(
                        breaker = %self.name,
                        successes = inner.success_count,
                        "circuit breaker closed"
                    );
                }
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "success recorded while open");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.call_count += 1;
        inner.outcomes.push(false);
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(self.clock.now());
        inner.last_failure_at = Some(self.clock.utc_now());

        match inner.state {
            CircuitState::Closed if inner.failure_count >= inner.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(breaker = %self.name, "circuit breaker reopened by half-open failure");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Remaining time before an open breaker admits a probe
    pub fn time_until_retry(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let recovery_timeout = inner.config.recovery_timeout;
        let elapsed = inner
            .last_failure
            .map_or(recovery_timeout, |at| self.clock.now().saturating_duration_since(at));
        Some(recovery_timeout.saturating_sub(elapsed))
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            call_count: inner.call_count,
            success_rate: inner.success_rate(),
            last_failure_time: inner.last_failure_at,
        }
    }

    /// Returns to Closed with all counters and history cleared
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let config = inner.config.clone();
        *inner = BreakerState::new(config);
        drop(inner);
        info!(breaker = %self.name, "circuit breaker reset");
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the circuit breaker
    //!
    //! Tests cover configuration validation, the closed/open/half-open state
    //! machine, gradual failure erosion, the rolling outcome window and
    //! concurrent recording.

    use std::sync::Arc;

    use super::*;
    use crate::resilience::clock::MockClock;

    fn breaker(
        failure_threshold: u32,
        recovery: Duration,
        success_threshold: u32,
    ) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(failure_threshold)
            .recovery_timeout(recovery)
            .success_threshold(success_threshold)
            .build()
            .unwrap();
        (CircuitBreaker::with_clock("crm", config, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(
            CircuitBreakerConfig::builder().failure_threshold(0).build(),
            Err(BreakerConfigError::ZeroThreshold { field: "failure_threshold" })
        );
        assert_eq!(
            CircuitBreakerConfig::builder().success_threshold(0).build(),
            Err(BreakerConfigError::ZeroThreshold { field: "success_threshold" })
        );
        assert_eq!(
            CircuitBreakerConfig::builder().recovery_timeout(Duration::ZERO).build(),
            Err(BreakerConfigError::ZeroRecoveryTimeout)
        );
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    /// Validates the open-then-half-open path after the recovery timeout.
    ///
    /// Assertions:
    /// - Confirms three failures open the breaker and block execution.
    /// - Confirms that after 10s with a 5s recovery timeout the breaker
    ///   admits a probe and reports Half-Open.
    #[test]
    fn test_opens_and_recovers_to_half_open() {
        let (breaker, clock) = breaker(3, Duration::from_secs(5), 2);

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        clock.advance_secs(4);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.time_until_retry(), Some(Duration::from_secs(1)));

        clock.advance_secs(6);
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.time_until_retry(), None);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (breaker, clock) = breaker(2, Duration::from_secs(1), 2);
        breaker.record_failure();
        breaker.record_failure();
        clock.advance_secs(1);
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    /// Validates half-open successes close the breaker.
    ///
    /// Assertions:
    /// - Confirms one success is not enough with `success_threshold = 2`.
    /// - Confirms the second success closes and zeroes `failure_count`.
    #[test]
    fn test_half_open_successes_close() {
        let (breaker, clock) = breaker(2, Duration::from_secs(1), 2);
        breaker.record_failure();
        breaker.record_failure();
        clock.advance_secs(2);
        assert!(breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 2);
    }

    #[test]
    fn test_reentering_half_open_resets_success_count() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1), 3);
        breaker.record_failure();
        clock.advance_secs(1);
        assert!(breaker.can_execute());
        breaker.record_success();
        breaker.record_failure();

        clock.advance_secs(1);
        assert!(breaker.can_execute());
        assert_eq!(breaker.snapshot().success_count, 0);
    }

    #[test]
    fn test_closed_success_erodes_failures_gradually() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(1), 1);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.snapshot().failure_count, 1);

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.snapshot().failure_count, 0);

        // Interleaved successes keep the breaker closed indefinitely.
        for _ in 0..10 {
            breaker.record_failure();
            breaker.record_success();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_snapshot_window_and_counts() {
        let (breaker, _clock) = breaker(1000, Duration::from_secs(1), 1);
        for i in 0..150 {
            if i % 4 == 0 {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.call_count, 150);
        // Window holds calls 50..150, of which 25 are failures.
        assert!((snapshot.success_rate - 0.75).abs() < f64::EPSILON);
        assert!(snapshot.last_failure_time.is_some());
        assert_eq!(snapshot, breaker.snapshot());
    }

    #[test]
    fn test_reconfigure_keeps_state_and_applies_new_thresholds() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(5), 1);
        breaker.record_failure();

        let stricter = CircuitBreakerConfig::builder().failure_threshold(2).build().unwrap();
        breaker.reconfigure(stricter).unwrap();
        assert_eq!(breaker.snapshot().failure_count, 1);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.config().failure_threshold, 2);

        let invalid = CircuitBreakerConfig { success_threshold: 0, ..CircuitBreakerConfig::default() };
        assert!(breaker.reconfigure(invalid).is_err());
        assert_eq!(breaker.config().success_threshold, 3);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(60), 1);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.call_count, 0);
        assert!((snapshot.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(snapshot.last_failure_time.is_none());
    }

    #[test]
    fn test_concurrent_recording_is_linearized() {
        let config = CircuitBreakerConfig::builder().failure_threshold(10_000).build().unwrap();
        let breaker = Arc::new(CircuitBreaker::new("shared", config).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        if worker % 2 == 0 {
                            breaker.record_failure();
                        } else {
                            breaker.record_success();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.call_count, 2000);
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert!(snapshot.failure_count <= 1000);
    }
}
