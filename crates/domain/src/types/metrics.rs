//! Windowed error metrics and summaries

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_common::duration_millis;
use serde::{Deserialize, Serialize};

use super::alerts::FiredAlert;
use super::pattern::ErrorPattern;

/// Metrics over the error history within one time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    #[serde(with = "duration_millis")]
    pub window: Duration,
    pub generated_at: DateTime<Utc>,
    pub total_errors: usize,
    pub error_rate_per_hour: f64,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_stage: BTreeMap<String, usize>,
    pub by_operation: BTreeMap<String, usize>,
    /// Most frequent error types, most frequent first
    pub top_error_types: Vec<(String, usize)>,
    pub affected_entities: BTreeSet<String>,
    pub critical_errors: usize,
    pub recoverable_errors: usize,
    /// Empty when pattern detection is disabled
    pub patterns: Vec<ErrorPattern>,
}

impl ErrorMetrics {
    pub fn empty(window: Duration, generated_at: DateTime<Utc>) -> Self {
        Self {
            window,
            generated_at,
            total_errors: 0,
            error_rate_per_hour: 0.0,
            by_severity: BTreeMap::new(),
            by_category: BTreeMap::new(),
            by_stage: BTreeMap::new(),
            by_operation: BTreeMap::new(),
            top_error_types: Vec::new(),
            affected_entities: BTreeSet::new(),
            critical_errors: 0,
            recoverable_errors: 0,
            patterns: Vec::new(),
        }
    }
}

/// Reporting headline over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    #[serde(with = "duration_millis")]
    pub window: Duration,
    pub total_errors: usize,
    pub error_rate_per_hour: f64,
    pub critical_errors: usize,
    pub affected_entity_count: usize,
    pub top_error_types: Vec<(String, usize)>,
    pub top_patterns: Vec<ErrorPattern>,
    pub alerts: Vec<FiredAlert>,
}

/// Totals across the batches a propagation manager has recorded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationSummary {
    pub batches: usize,
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    /// Percentage of successful items across all batches
    pub overall_success_rate: f64,
    pub critical_errors: usize,
    pub stopped_early: usize,
    pub stages_with_failures: BTreeSet<String>,
}
