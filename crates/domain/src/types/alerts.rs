//! Alert rules and fired alerts

use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_common::duration_millis;
use serde::{Deserialize, Serialize};

use super::metrics::ErrorMetrics;
use crate::constants::{
    ALERT_ERROR_COUNT_WARNING, ALERT_ERROR_RATE_CRITICAL, ALERT_ERROR_RATE_WARNING,
    ALERT_WINDOW_SECS,
};
use crate::impl_domain_status_conversions;

/// Metric an alert rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    /// Errors per hour within the window
    ErrorRate,
    ErrorCount,
    CriticalErrors,
}

impl_domain_status_conversions!(AlertMetric {
    ErrorRate => "error_rate",
    ErrorCount => "error_count",
    CriticalErrors => "critical_errors",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl_domain_status_conversions!(AlertLevel {
    Info => "info",
    Warning => "warning",
    Critical => "critical",
});

/// One alert rule; fires when the observed value exceeds `threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub metric: AlertMetric,
    pub threshold: f64,
    #[serde(with = "duration_millis")]
    pub window: Duration,
    pub level: AlertLevel,
}

impl AlertThreshold {
    pub const fn new(metric: AlertMetric, threshold: f64, window: Duration, level: AlertLevel) -> Self {
        Self { metric, threshold, window, level }
    }

    /// Built-in rules, all over the last hour
    pub fn defaults() -> Vec<Self> {
        let hour = Duration::from_secs(ALERT_WINDOW_SECS);
        vec![
            Self::new(AlertMetric::ErrorRate, ALERT_ERROR_RATE_WARNING, hour, AlertLevel::Warning),
            Self::new(AlertMetric::ErrorRate, ALERT_ERROR_RATE_CRITICAL, hour, AlertLevel::Critical),
            Self::new(AlertMetric::CriticalErrors, 0.0, hour, AlertLevel::Critical),
            Self::new(AlertMetric::ErrorCount, ALERT_ERROR_COUNT_WARNING, hour, AlertLevel::Warning),
        ]
    }

    /// Value of the watched metric in `metrics`
    #[allow(clippy::cast_precision_loss)]
    pub fn observe(&self, metrics: &ErrorMetrics) -> f64 {
        match self.metric {
            AlertMetric::ErrorRate => metrics.error_rate_per_hour,
            AlertMetric::ErrorCount => metrics.total_errors as f64,
            AlertMetric::CriticalErrors => metrics.critical_errors as f64,
        }
    }

    pub fn applies_to(&self, metrics: &ErrorMetrics) -> bool {
        self.window == metrics.window
    }
}

/// A rule that fired, with the metrics it was evaluated against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredAlert {
    pub threshold: AlertThreshold,
    pub observed: f64,
    pub fired_at: DateTime<Utc>,
    pub metrics: ErrorMetrics,
}

impl FiredAlert {
    pub const fn level(&self) -> AlertLevel {
        self.threshold.level
    }
}
