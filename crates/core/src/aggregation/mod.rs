//! Rolling error history with windowed metrics, patterns and alerts
//!
//! The aggregator keeps a bounded, insertion-ordered history of
//! [`ErrorRecord`]s. Metrics are computed from a snapshot of the records in
//! the requested window, so the history lock is never held while patterns
//! are built.

pub mod alerts;
pub mod patterns;

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_common::collections::BoundedWindow;
use keel_common::resilience::{Clock, SystemClock};
use keel_domain::constants::{SUMMARY_TOP_ENTRIES, TOP_ERROR_TYPES};
use keel_domain::{AlertThreshold, BatchResult, ErrorMetrics, ErrorRecord, ErrorSummary, FiredAlert};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

pub use alerts::evaluate_thresholds;
pub use patterns::detect_patterns;

use crate::config::AggregatorConfig;

/// Bounded error history shared by every pipeline stage
#[derive(Debug)]
pub struct ErrorAggregator<C: Clock = SystemClock> {
    config: AggregatorConfig,
    history: Mutex<BoundedWindow<ErrorRecord>>,
    thresholds: RwLock<Vec<AlertThreshold>>,
    clock: C,
}

impl ErrorAggregator<SystemClock> {
    pub fn new(config: AggregatorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for ErrorAggregator<SystemClock> {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl<C: Clock> ErrorAggregator<C> {
    /// Aggregator with the built-in alert rules
    pub fn with_clock(config: AggregatorConfig, clock: C) -> Self {
        Self {
            history: Mutex::new(BoundedWindow::new(config.max_history)),
            thresholds: RwLock::new(AlertThreshold::defaults()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn add_error(&self, record: ErrorRecord) {
        if let Some(evicted) = self.history.lock().push(record) {
            debug!(error_id = %evicted.id, "Evicted oldest error from history");
        }
    }

    pub fn add_errors<I: IntoIterator<Item = ErrorRecord>>(&self, records: I) {
        self.history.lock().extend(records);
    }

    /// Flatten a batch's errors into the history
    pub fn add_batch_result(&self, batch: &BatchResult) {
        self.add_errors(batch.errors().iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Records dropped from the history since creation
    pub fn evicted(&self) -> u64 {
        self.history.lock().evicted()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

    pub fn add_alert_threshold(&self, threshold: AlertThreshold) {
        self.thresholds.write().push(threshold);
    }

    pub fn alert_thresholds(&self) -> Vec<AlertThreshold> {
        self.thresholds.read().clone()
    }

    /// Copy of the records observed within `window` of now, oldest first
    pub fn errors_in_window(&self, window: Duration) -> Vec<ErrorRecord> {
        let start = window_start(self.clock.utc_now(), window);
        self.history
            .lock()
            .iter()
            .filter(|record| start.map_or(true, |start| record.timestamp >= start))
            .cloned()
            .collect()
    }

    /// Metrics over the records observed within `window` of now
    pub fn generate_error_metrics(&self, window: Duration) -> ErrorMetrics {
        let now = self.clock.utc_now();
        let records = self.errors_in_window(window);
        let mut metrics = ErrorMetrics::empty(window, now);

        metrics.total_errors = records.len();
        metrics.error_rate_per_hour = rate_per_hour(records.len(), window);

        let mut type_counts: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            *metrics.by_severity.entry(record.severity().as_str().to_string()).or_default() += 1;
            *metrics.by_category.entry(record.category().as_str().to_string()).or_default() += 1;
            *metrics.by_stage.entry(record.stage.clone()).or_default() += 1;
            *metrics.by_operation.entry(record.operation.clone()).or_default() += 1;
            *type_counts.entry(record.error_type.as_str()).or_default() += 1;
            if let Some(entity) = &record.entity_id {
                metrics.affected_entities.insert(entity.clone());
            }
            if record.is_critical_severity() {
                metrics.critical_errors += 1;
            }
            if record.recoverable() {
                metrics.recoverable_errors += 1;
            }
        }
        metrics.top_error_types = top_counts(type_counts, TOP_ERROR_TYPES);

        if self.config.pattern_detection {
            metrics.patterns = detect_patterns(&records, self.config.max_samples);
        }
        metrics
    }

    /// Registered rules whose window equals `metrics.window` and that fire
    ///
    /// Rules configured for a different window are skipped, not rescaled.
    pub fn check_alert_thresholds(&self, metrics: &ErrorMetrics) -> Vec<FiredAlert> {
        let thresholds = self.thresholds.read().clone();
        evaluate_thresholds(&thresholds, metrics, self.clock.utc_now())
    }

    /// Headline numbers, top patterns and fired alerts for `window`
    pub fn get_error_summary(&self, window: Duration) -> ErrorSummary {
        let metrics = self.generate_error_metrics(window);
        let alerts = self.check_alert_thresholds(&metrics);
        ErrorSummary {
            window,
            total_errors: metrics.total_errors,
            error_rate_per_hour: metrics.error_rate_per_hour,
            critical_errors: metrics.critical_errors,
            affected_entity_count: metrics.affected_entities.len(),
            top_error_types: metrics.top_error_types.iter().take(SUMMARY_TOP_ENTRIES).cloned().collect(),
            top_patterns: metrics.patterns.iter().take(SUMMARY_TOP_ENTRIES).cloned().collect(),
            alerts,
        }
    }

    /// Distinct stages present in the whole history
    pub fn stages(&self) -> BTreeSet<String> {
        self.history.lock().iter().map(|r| r.stage.clone()).collect()
    }
}

fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window).ok().and_then(|w| now.checked_sub_signed(w))
}

#[allow(clippy::cast_precision_loss)]
fn rate_per_hour(count: usize, window: Duration) -> f64 {
    let hours = window.as_secs_f64() / 3_600.0;
    if hours <= 0.0 {
        return 0.0;
    }
    count as f64 / hours
}

fn top_counts(counts: HashMap<&str, usize>, limit: usize) -> Vec<(String, usize)> {
    let mut sorted: Vec<(&str, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    sorted.into_iter().take(limit).map(|(name, count)| (name.to_string(), count)).collect()
}

#[cfg(test)]
mod tests {
    //! Unit tests for the error aggregator
    //!
    //! Tests cover history bounds, windowed metrics against a mock clock,
    //! pattern detection toggling and summary assembly.

    use keel_common::error::FailureOrigin;
    use keel_common::resilience::MockClock;
    use keel_domain::{AlertLevel, AlertMetric};

    use super::*;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn record(clock: &MockClock, origin: FailureOrigin, error_type: &str) -> ErrorRecord {
        ErrorRecord::new(origin, error_type, "failed", "scrape", "fetch_url")
            .with_timestamp(clock.utc_now())
    }

    #[test]
    fn test_history_is_bounded() {
        let config = AggregatorConfig { max_history: 3, ..AggregatorConfig::default() };
        let clock = MockClock::new();
        let aggregator = ErrorAggregator::with_clock(config, clock.clone());
        for _ in 0..5 {
            aggregator.add_error(record(&clock, FailureOrigin::Network, "ConnectionError"));
        }
        assert_eq!(aggregator.len(), 3);
        assert_eq!(aggregator.evicted(), 2);

        aggregator.clear();
        assert!(aggregator.is_empty());
    }

    /// Validates window filtering and breakdowns.
    ///
    /// Assertions:
    /// - Confirms records older than the window are excluded.
    /// - Confirms rate is count divided by window hours.
    /// - Confirms critical and recoverable counts.
    #[test]
    fn test_metrics_respect_window() {
        let clock = MockClock::new();
        let aggregator = ErrorAggregator::with_clock(AggregatorConfig::default(), clock.clone());

        aggregator.add_error(record(&clock, FailureOrigin::Network, "ConnectionError"));
        clock.advance(Duration::from_secs(2 * 3_600));
        aggregator.add_error(record(&clock, FailureOrigin::Timeout, "TimeoutError"));
        aggregator.add_error(record(&clock, FailureOrigin::CriticalRuntime, "Panic"));
        aggregator.add_error(record(&clock, FailureOrigin::Timeout, "TimeoutError"));

        let metrics = aggregator.generate_error_metrics(HOUR);
        assert_eq!(metrics.total_errors, 3);
        assert!((metrics.error_rate_per_hour - 3.0).abs() < f64::EPSILON);
        assert_eq!(metrics.by_category.get("timeout"), Some(&2));
        assert_eq!(metrics.by_severity.get("critical"), Some(&1));
        assert_eq!(metrics.critical_errors, 1);
        assert_eq!(metrics.recoverable_errors, 2);
        assert_eq!(metrics.top_error_types[0], ("TimeoutError".to_string(), 2));
        assert_eq!(metrics.patterns.len(), 2);

        let daily = aggregator.generate_error_metrics(Duration::from_secs(86_400));
        assert_eq!(daily.total_errors, 4);
        assert!((daily.error_rate_per_hour - 4.0 / 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_detection_can_be_disabled() {
        let config = AggregatorConfig { pattern_detection: false, ..AggregatorConfig::default() };
        let aggregator = ErrorAggregator::new(config);
        aggregator.add_error(ErrorRecord::new(FailureOrigin::Network, "E", "m", "s", "o"));
        let metrics = aggregator.generate_error_metrics(HOUR);
        assert_eq!(metrics.total_errors, 1);
        assert!(metrics.patterns.is_empty());
    }

    #[test]
    fn test_batch_errors_are_flattened() {
        let aggregator = ErrorAggregator::default();
        let mut batch = BatchResult::new("b-1", "ingest", "parse", 3);
        batch.record_success();
        batch.record_failure(ErrorRecord::new(FailureOrigin::Validation, "ValueError", "x", "ingest", "parse"));
        batch.record_failure(ErrorRecord::new(FailureOrigin::Validation, "ValueError", "y", "ingest", "parse"));
        aggregator.add_batch_result(&batch);
        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.stages().into_iter().collect::<Vec<_>>(), vec!["ingest"]);
    }

    #[test]
    fn test_summary_includes_fired_alerts() {
        let aggregator = ErrorAggregator::default();
        aggregator.add_alert_threshold(AlertThreshold::new(
            AlertMetric::ErrorCount,
            1.0,
            HOUR,
            AlertLevel::Info,
        ));
        for _ in 0..2 {
            aggregator.add_error(ErrorRecord::new(FailureOrigin::CriticalRuntime, "Panic", "m", "s", "o"));
        }

        let summary = aggregator.get_error_summary(HOUR);
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.critical_errors, 2);
        assert_eq!(summary.top_patterns.len(), 1);
        let levels: Vec<_> = summary.alerts.iter().map(FiredAlert::level).collect();
        assert_eq!(levels, vec![AlertLevel::Critical, AlertLevel::Info]);
    }

    /// Validates that only rules for the evaluated window are checked.
    ///
    /// Assertions:
    /// - Confirms a daily rule stays silent against hourly metrics.
    /// - Confirms the same rule fires against daily metrics.
    #[test]
    fn test_alerts_only_evaluate_rules_for_the_metrics_window() {
        let day = Duration::from_secs(86_400);
        let aggregator = ErrorAggregator::default();
        aggregator.add_alert_threshold(AlertThreshold::new(AlertMetric::ErrorCount, 0.0, day, AlertLevel::Warning));
        aggregator.add_error(ErrorRecord::new(FailureOrigin::Network, "ConnectionError", "m", "s", "o"));

        let hourly = aggregator.generate_error_metrics(HOUR);
        assert!(aggregator.check_alert_thresholds(&hourly).is_empty());

        let daily = aggregator.generate_error_metrics(day);
        let fired = aggregator.check_alert_thresholds(&daily);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].level(), AlertLevel::Warning);
    }

    #[test]
    fn test_metrics_are_idempotent() {
        let clock = MockClock::new();
        let aggregator = ErrorAggregator::with_clock(AggregatorConfig::default(), clock.clone());
        aggregator.add_error(record(&clock, FailureOrigin::Network, "ConnectionError"));
        let first = aggregator.generate_error_metrics(HOUR);
        let second = aggregator.generate_error_metrics(HOUR);
        assert_eq!(first, second);
    }
}
