//! Runtime configuration for the resilience core
//!
//! Every section is defaulted, so an empty TOML or JSON document yields a
//! working configuration. Durations are written as milliseconds.

use std::collections::BTreeMap;
use std::time::Duration;

use keel_common::duration_millis;
use keel_common::resilience::{CircuitBreakerConfig, RetryPolicy};
use keel_domain::constants::{
    DEFAULT_MAX_BATCH_HISTORY, DEFAULT_MAX_CONCURRENT_REDELIVERIES, DEFAULT_MAX_ERROR_HISTORY,
    DEFAULT_PAYMENT_DESTINATIONS, DEFAULT_SWEEP_INTERVAL_SECS, MAX_PATTERN_SAMPLES,
};
use keel_domain::{KeelError, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub propagation: PropagationConfig,
    pub aggregator: AggregatorConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Batch continue/stop policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Failed fraction above which a batch stops
    pub max_error_threshold: f64,
    pub stop_on_critical: bool,
    pub continue_on_error: bool,
    pub max_batch_history: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_error_threshold: 0.5,
            stop_on_critical: true,
            continue_on_error: true,
            max_batch_history: DEFAULT_MAX_BATCH_HISTORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub max_history: usize,
    pub pattern_detection: bool,
    pub max_samples: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_ERROR_HISTORY,
            pattern_detection: true,
            max_samples: MAX_PATTERN_SAMPLES,
        }
    }
}

/// Delayed redelivery scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
    pub max_concurrency: usize,
    /// Destinations whose retries are always Critical
    pub payment_destinations: Vec<String>,
    /// Per-destination policy overrides
    pub destinations: BTreeMap<String, RetryPolicy>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENT_REDELIVERIES,
            payment_destinations: DEFAULT_PAYMENT_DESTINATIONS
                .iter()
                .map(|d| (*d).to_string())
                .collect(),
            destinations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `keel_core=debug,info`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl KeelConfig {
    /// Reject configurations the runtime cannot honour
    ///
    /// # Errors
    /// Returns `KeelError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate().map_err(|e| KeelError::Config(e.to_string()))?;
        self.circuit_breaker.validate().map_err(|e| KeelError::Config(e.to_string()))?;
        for (destination, policy) in &self.scheduler.destinations {
            policy
                .validate()
                .map_err(|e| KeelError::Config(format!("destination '{destination}': {e}")))?;
        }

        let threshold = self.propagation.max_error_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(KeelError::Config(format!(
                "propagation.max_error_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.propagation.max_batch_history == 0 {
            return Err(KeelError::Config("propagation.max_batch_history must be positive".into()));
        }
        if self.aggregator.max_history == 0 {
            return Err(KeelError::Config("aggregator.max_history must be positive".into()));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(KeelError::Config("scheduler.max_concurrency must be positive".into()));
        }
        if self.scheduler.sweep_interval.is_zero() {
            return Err(KeelError::Config("scheduler.sweep_interval must be positive".into()));
        }
        Ok(())
    }

    /// Policy for `destination`, falling back to the default retry policy
    pub fn policy_for(&self, destination: &str) -> &RetryPolicy {
        self.scheduler.destinations.get(destination).unwrap_or(&self.retry)
    }
}
