//! Aggregate outcome of processing a collection as one unit

use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_common::duration_millis;
use serde::{Deserialize, Serialize};

use super::context::ContextMap;
use super::error_record::ErrorRecord;

/// Outcome of one batch
///
/// Counts are only changed through the `record_*` methods so that
/// `failed_items()` always equals `errors().len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub stage: String,
    pub operation: String,
    total_items: usize,
    successful_items: usize,
    failed_items: usize,
    skipped_items: usize,
    errors: Vec<ErrorRecord>,
    #[serde(with = "duration_millis")]
    duration: Duration,
    #[serde(default)]
    pub context: ContextMap,
    pub started_at: DateTime<Utc>,
    stopped_early: bool,
}

impl BatchResult {
    pub fn new(
        batch_id: impl Into<String>,
        stage: impl Into<String>,
        operation: impl Into<String>,
        total_items: usize,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            stage: stage.into(),
            operation: operation.into(),
            total_items,
            successful_items: 0,
            failed_items: 0,
            skipped_items: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
            context: ContextMap::new(),
            started_at: Utc::now(),
            stopped_early: false,
        }
    }

    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    pub fn record_success(&mut self) {
        self.successful_items += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped_items += 1;
    }

    pub fn record_failure(&mut self, error: ErrorRecord) {
        self.errors.push(error);
        self.failed_items = self.errors.len();
    }

    /// Mark that processing halted before every item was attempted
    pub fn mark_stopped_early(&mut self) {
        self.stopped_early = true;
    }

    pub fn finish(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub const fn total_items(&self) -> usize {
        self.total_items
    }

    pub const fn successful_items(&self) -> usize {
        self.successful_items
    }

    pub const fn failed_items(&self) -> usize {
        self.failed_items
    }

    pub const fn skipped_items(&self) -> usize {
        self.skipped_items
    }

    /// Items that reached a success, failure or skip outcome
    pub const fn processed_items(&self) -> usize {
        self.successful_items + self.failed_items + self.skipped_items
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ErrorRecord> {
        self.errors
    }

    pub const fn duration(&self) -> Duration {
        self.duration
    }

    pub const fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    /// Successful items as a percentage of total items (0 when empty)
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.successful_items as f64 / self.total_items as f64 * 100.0
    }

    /// Failed items as a fraction of total items (0 when empty)
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_ratio(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.failed_items as f64 / self.total_items as f64
    }

    pub const fn has_failures(&self) -> bool {
        self.failed_items > 0
    }

    pub fn has_critical_errors(&self) -> bool {
        self.errors.iter().any(ErrorRecord::is_critical_severity)
    }

    pub fn critical_error_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_critical_severity()).count()
    }
}

#[cfg(test)]
mod tests {
    use keel_common::error::FailureOrigin;

    use super::*;

    fn failure(origin: FailureOrigin) -> ErrorRecord {
        ErrorRecord::new(origin, "ValueError", "bad item", "ingest", "parse")
    }

    #[test]
    fn test_counts_and_rates() {
        let mut batch = BatchResult::new("b-1", "ingest", "parse", 5);
        for _ in 0..4 {
            batch.record_success();
        }
        batch.record_failure(failure(FailureOrigin::Validation));

        assert_eq!(batch.failed_items(), batch.errors().len());
        assert_eq!(batch.processed_items(), 5);
        assert!((batch.success_rate() - 80.0).abs() < f64::EPSILON);
        assert!((batch.failure_ratio() - 0.2).abs() < f64::EPSILON);
        assert!(batch.has_failures());
        assert!(!batch.has_critical_errors());
    }

    #[test]
    fn test_empty_batch_rates_are_zero() {
        let batch = BatchResult::new("b-0", "ingest", "parse", 0);
        assert!(batch.success_rate().abs() < f64::EPSILON);
        assert!(batch.failure_ratio().abs() < f64::EPSILON);
        assert!(!batch.has_failures());
    }

    #[test]
    fn test_critical_detection() {
        let mut batch = BatchResult::new("b-2", "ingest", "parse", 3);
        batch.record_failure(failure(FailureOrigin::Network));
        assert!(!batch.has_critical_errors());
        batch.record_failure(failure(FailureOrigin::CriticalRuntime));
        assert!(batch.has_critical_errors());
        assert_eq!(batch.critical_error_count(), 1);
    }

    #[test]
    fn test_serialized_duration_is_millis() {
        let mut batch = BatchResult::new("b-3", "export", "write", 1);
        batch.record_skip();
        batch.finish(Duration::from_millis(1500));
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["skipped_items"], 1);
    }
}
