//! Lazily populated map of per-destination circuit breakers
//!
//! Every caller targeting the same destination key gets the same
//! [`CircuitBreaker`] instance. Breakers are created on first reference from
//! either a per-key override or the registry default, and live until the
//! registry is dropped. Reconfiguring a key updates its existing breaker in
//! place, so handles taken earlier keep seeing the same state.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{
    BreakerConfigError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
use super::clock::{Clock, SystemClock};

/// Shared registry of breakers keyed by destination
#[derive(Debug)]
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    default_config: CircuitBreakerConfig,
    overrides: DashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    clock: C,
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new(default_config: CircuitBreakerConfig) -> Result<Self, BreakerConfigError> {
        Self::with_clock(default_config, SystemClock)
    }
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self {
            default_config: CircuitBreakerConfig::default(),
            overrides: DashMap::new(),
            breakers: DashMap::new(),
            clock: SystemClock,
        }
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    pub fn with_clock(
        default_config: CircuitBreakerConfig,
        clock: C,
    ) -> Result<Self, BreakerConfigError> {
        default_config.validate()?;
        Ok(Self { default_config, overrides: DashMap::new(), breakers: DashMap::new(), clock })
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Sets a per-destination config
    ///
    /// A breaker already created for `key` keeps its state and counters and
    /// switches to the new thresholds.
    pub fn configure(
        &self,
        key: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<(), BreakerConfigError> {
        config.validate()?;
        let key = key.into();
        self.overrides.insert(key.clone(), config.clone());
        if let Some(existing) = self.peek(&key) {
            existing.reconfigure(config)?;
        }
        Ok(())
    }

    /// Returns the breaker for `key`, creating it on first use
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(key.to_string()).or_insert_with(|| {
            let config = self
                .overrides
                .get(key)
                .map_or_else(|| self.default_config.clone(), |c| c.value().clone());
            debug!(destination = key, "creating circuit breaker");
            Arc::new(CircuitBreaker::from_validated(key, config, self.clock.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Returns the breaker for `key` only if one was already created
    pub fn peek(&self, key: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether calls to `key` are currently allowed; creates the breaker
    pub fn can_execute(&self, key: &str) -> bool {
        self.get(key).can_execute()
    }

    pub fn snapshot(&self, key: &str) -> Option<CircuitBreakerSnapshot> {
        self.peek(key).map(|breaker| breaker.snapshot())
    }

    /// Snapshots of every breaker, sorted by destination name
    pub fn snapshot_all(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Resets one breaker; returns false when it was never created
    pub fn reset(&self, key: &str) -> bool {
        match self.peek(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the breaker registry

    use std::time::Duration;

    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::clock::MockClock;

    #[test]
    fn test_same_key_shares_one_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get("stripe");
        let b = registry.get("stripe");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.peek("hubspot").is_none());
    }

    /// Validates per-key overrides and isolation between destinations.
    ///
    /// Assertions:
    /// - Confirms the override threshold opens `flaky` after one failure.
    /// - Confirms `steady` is unaffected and uses the default config.
    #[test]
    fn test_overrides_apply_per_destination() {
        let registry = CircuitBreakerRegistry::default();
        registry
            .configure("flaky", CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap())
            .unwrap();

        registry.get("flaky").record_failure();
        registry.get("steady").record_failure();

        assert_eq!(registry.get("flaky").state(), CircuitState::Open);
        assert_eq!(registry.get("steady").state(), CircuitState::Closed);
        assert_eq!(registry.get("steady").config().failure_threshold, 5);
        assert!(!registry.can_execute("flaky"));
    }

    /// Validates reconfiguring a destination keeps its one shared breaker.
    ///
    /// Assertions:
    /// - Confirms a handle taken before `configure` is the registry's breaker.
    /// - Confirms failures through that handle count against the new threshold.
    #[test]
    fn test_configure_updates_existing_breaker_in_place() {
        let registry = CircuitBreakerRegistry::default();
        let held = registry.get("crm");
        registry
            .configure("crm", CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap())
            .unwrap();

        held.record_failure();
        let current = registry.get("crm");
        assert!(Arc::ptr_eq(&held, &current));
        assert_eq!(current.snapshot().failure_count, 1);
        assert_eq!(current.state(), CircuitState::Open);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let registry = CircuitBreakerRegistry::default();
        let bad = CircuitBreakerConfig { failure_threshold: 0, ..CircuitBreakerConfig::default() };
        assert!(registry.configure("x", bad).is_err());
    }

    #[test]
    fn test_snapshots_sorted_and_reset() {
        let clock = MockClock::new();
        let registry = CircuitBreakerRegistry::with_clock(
            CircuitBreakerConfig::builder()
                .failure_threshold(1)
                .recovery_timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            clock.clone(),
        )
        .unwrap();

        registry.get("zapier").record_failure();
        registry.get("airtable").record_success();

        let names: Vec<_> = registry.snapshot_all().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["airtable", "zapier"]);

        clock.advance_secs(5);
        assert!(registry.can_execute("zapier"));
        assert_eq!(registry.snapshot("zapier").map(|s| s.state), Some(CircuitState::HalfOpen));

        assert!(registry.reset("zapier"));
        assert!(!registry.reset("unknown"));
        registry.reset_all();
        assert!(registry.snapshot_all().iter().all(|s| s.call_count == 0));
    }
}
