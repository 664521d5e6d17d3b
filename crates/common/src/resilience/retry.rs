//! Retry policy evaluation
//!
//! A [`RetryPolicy`] answers two questions without side effects: is this
//! failure mechanically retryable, and how long should the caller wait before
//! attempt `n + 1`. Business-level eligibility (budgets, quotas) is decided
//! by callers before they reach the executor.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorCategory, ErrorClassification, RetryStrategy};
use crate::utils::serde::duration_millis;

/// Fraction of the computed delay that jitter may add on top
pub const JITTER_FACTOR: f64 = 0.1;

/// Invalid retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryConfigError {
    #[error("Invalid retry configuration for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

impl RetryConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Backoff configuration and retryability rules for one destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Adds up to 10% on top of each delay
    pub jitter: bool,
    pub strategy: RetryStrategy,
    /// Categories treated as transient
    pub retryable_categories: HashSet<ErrorCategory>,
    /// Concrete error type names treated as transient
    pub retryable_types: HashSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            strategy: RetryStrategy::Exponential,
            retryable_categories: [
                ErrorCategory::Network,
                ErrorCategory::Timeout,
                ErrorCategory::ExternalApi,
            ]
            .into_iter()
            .collect(),
            retryable_types: ["ConnectionError", "TimeoutError"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_attempts == 0 {
            return Err(RetryConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(RetryConfigError::invalid(
                "exponential_base",
                format!("must be a finite value >= 1.0, got {}", self.exponential_base),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(RetryConfigError::invalid(
                "max_delay",
                format!("{:?} is shorter than base_delay {:?}", self.max_delay, self.base_delay),
            ));
        }
        Ok(())
    }

    /// Whether `error` is a transient failure worth another attempt
    ///
    /// True when its category or concrete type is configured as retryable,
    /// or when it carries a retry hint other than `none`.
    pub fn is_retryable<E: ErrorClassification + ?Sized>(&self, error: &E) -> bool {
        self.retryable_categories.contains(&error.category())
            || self.retryable_types.contains(error.error_type())
            || error.retry_hint().is_some_and(|hint| hint != RetryStrategy::None)
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let raw = match self.strategy {
            RetryStrategy::Exponential => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                base * self.exponential_base.powi(exponent)
            }
            RetryStrategy::Linear => base * f64::from(attempt),
            RetryStrategy::Immediate => 0.0,
            RetryStrategy::None => base,
        };
        let ceiling = self.max_delay.as_secs_f64();
        if !raw.is_finite() || raw >= ceiling {
            self.max_delay
        } else {
            let nanos = (raw.max(0.0) * 1e9).round();
            Duration::from_nanos(nanos as u64)
        }
    }

    /// Delay before the attempt following `attempt`, with jitter applied
    ///
    /// Jitter is added after the `max_delay` clamp and only ever lengthens
    /// the delay, so a jittered delay may reach `max_delay * (1 + JITTER_FACTOR)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        delay + delay.mul_f64(JITTER_FACTOR * factor)
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn exponential_base(mut self, base: f64) -> Self {
        self.policy.exponential_base = base;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.policy.strategy = strategy;
        self
    }

    pub fn retryable_category(mut self, category: ErrorCategory) -> Self {
        self.policy.retryable_categories.insert(category);
        self
    }

    pub fn retryable_type(mut self, error_type: impl Into<String>) -> Self {
        self.policy.retryable_types.insert(error_type.into());
        self
    }

    /// Replaces the default retryable categories
    pub fn retryable_categories<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = ErrorCategory>,
    {
        self.policy.retryable_categories = categories.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<RetryPolicy, RetryConfigError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
