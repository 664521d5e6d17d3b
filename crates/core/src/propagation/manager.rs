//! Continue/stop decisions for running batches

use std::sync::Arc;

use keel_common::collections::BoundedWindow;
use keel_domain::{BatchResult, PropagationSummary};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::aggregation::ErrorAggregator;
use crate::config::PropagationConfig;

/// Decides whether a batch keeps going and records finished batches
#[derive(Debug)]
pub struct ErrorPropagationManager {
    config: PropagationConfig,
    history: Mutex<BoundedWindow<BatchResult>>,
    aggregator: Option<Arc<ErrorAggregator>>,
}

impl ErrorPropagationManager {
    pub fn new(config: PropagationConfig) -> Self {
        Self {
            history: Mutex::new(BoundedWindow::new(config.max_batch_history)),
            config,
            aggregator: None,
        }
    }

    /// Forward recorded batches' errors to `aggregator`
    pub fn with_aggregator(mut self, aggregator: Arc<ErrorAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Whether processing should move on to the next item
    ///
    /// Stops on any critical error when `stop_on_critical` is set, and when
    /// the failed fraction of a non-empty batch exceeds
    /// `max_error_threshold`.
    pub fn should_continue_batch(&self, batch: &BatchResult) -> bool {
        if self.config.stop_on_critical && batch.has_critical_errors() {
            warn!(batch_id = %batch.batch_id, "Critical error in batch, stopping");
            return false;
        }
        if batch.total_items() > 0 && batch.failure_ratio() > self.config.max_error_threshold {
            warn!(
                batch_id = %batch.batch_id,
                failed = batch.failed_items(),
                total = batch.total_items(),
                threshold = self.config.max_error_threshold,
                "Batch error rate above threshold, stopping"
            );
            return false;
        }
        true
    }

    /// Store a finished batch and hand its errors to the aggregator
    pub fn record_batch_result(&self, batch: BatchResult) {
        info!(
            batch_id = %batch.batch_id,
            stage = %batch.stage,
            successful = batch.successful_items(),
            failed = batch.failed_items(),
            skipped = batch.skipped_items(),
            stopped_early = batch.stopped_early(),
            "Batch finished"
        );
        if let Some(aggregator) = &self.aggregator {
            aggregator.add_batch_result(&batch);
        }
        self.history.lock().push(batch);
    }

    pub fn batch_history(&self) -> Vec<BatchResult> {
        self.history.lock().snapshot()
    }

    /// Totals across every recorded batch still in history
    #[allow(clippy::cast_precision_loss)]
    pub fn get_error_summary(&self) -> PropagationSummary {
        let history = self.history.lock();
        let mut summary = PropagationSummary { batches: history.len(), ..PropagationSummary::default() };
        for batch in history.iter() {
            summary.total_items += batch.total_items();
            summary.successful_items += batch.successful_items();
            summary.failed_items += batch.failed_items();
            summary.skipped_items += batch.skipped_items();
            summary.critical_errors += batch.critical_error_count();
            if batch.stopped_early() {
                summary.stopped_early += 1;
            }
            if batch.has_failures() {
                summary.stages_with_failures.insert(batch.stage.clone());
            }
        }
        if summary.total_items > 0 {
            summary.overall_success_rate =
                summary.successful_items as f64 / summary.total_items as f64 * 100.0;
        }
        summary
    }
}

impl Default for ErrorPropagationManager {
    fn default() -> Self {
        Self::new(PropagationConfig::default())
    }
}
