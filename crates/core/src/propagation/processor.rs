//! Item-by-item batch execution
//!
//! The blocking and async entry points share one [`BatchRun`] that turns
//! each item outcome into counts and error records and asks the
//! propagation manager whether to go on.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use keel_common::error::ErrorClassification;
use keel_domain::{BatchResult, ContextMap, ErrorRecord};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::manager::ErrorPropagationManager;

/// Identity and shared context of one batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub batch_id: String,
    pub stage: String,
    pub operation: String,
    pub context: ContextMap,
}

impl BatchJob {
    pub fn new(stage: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            batch_id: Uuid::now_v7().to_string(),
            stage: stage.into(),
            operation: operation.into(),
            context: ContextMap::new(),
        }
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = batch_id.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// What the per-item function sees besides the item itself
#[derive(Debug, Clone, PartialEq)]
pub struct ItemContext {
    pub index: usize,
    pub batch_id: String,
    pub stage: String,
    pub operation: String,
    /// Batch context plus `item_index` and `batch_id`
    pub context: ContextMap,
}

/// A finished batch and the values its successful items produced
#[derive(Debug, Clone)]
pub struct ProcessedBatch<R> {
    pub result: BatchResult,
    pub outputs: Vec<R>,
}

/// Runs a per-item function over a collection under one continue/stop policy
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    manager: Arc<ErrorPropagationManager>,
}

impl BatchProcessor {
    pub fn new(manager: Arc<ErrorPropagationManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ErrorPropagationManager> {
        &self.manager
    }

    /// Process `items` in order with a blocking function
    ///
    /// `Ok(None)` marks an item skipped. Errors become [`ErrorRecord`]s in
    /// the result; nothing is raised to the caller. An error that already is
    /// an `ErrorRecord` keeps its provenance and gains the batch id and item
    /// context where it has none. Items after a stop
    /// decision are never attempted.
    #[instrument(skip_all, fields(batch_id = %job.batch_id, stage = %job.stage))]
    pub fn process<I, T, R, E, F>(&self, job: &BatchJob, items: I, mut processor: F) -> ProcessedBatch<R>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
        F: FnMut(T, &ItemContext) -> Result<Option<R>, E>,
        E: ErrorClassification + fmt::Display + 'static,
    {
        let items = items.into_iter();
        let mut run = BatchRun::start(&self.manager, job, items.len());
        for (index, item) in items.enumerate() {
            let ctx = run.item_context(index);
            let outcome = processor(item, &ctx);
            if !run.settle(outcome, &ctx) {
                break;
            }
        }
        run.finish()
    }

    /// Process `items` in order, awaiting each item before the next
    #[instrument(skip_all, fields(batch_id = %job.batch_id, stage = %job.stage))]
    pub async fn process_async<I, T, R, E, F, Fut>(
        &self,
        job: &BatchJob,
        items: I,
        mut processor: F,
    ) -> ProcessedBatch<R>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
        F: FnMut(T, ItemContext) -> Fut,
        Fut: Future<Output = Result<Option<R>, E>>,
        E: ErrorClassification + fmt::Display + 'static,
    {
        let items = items.into_iter();
        let mut run = BatchRun::start(&self.manager, job, items.len());
        for (index, item) in items.enumerate() {
            let ctx = run.item_context(index);
            let outcome = processor(item, ctx.clone()).await;
            if !run.settle(outcome, &ctx) {
                break;
            }
        }
        run.finish()
    }
}

struct BatchRun<'a, R> {
    manager: &'a ErrorPropagationManager,
    job: &'a BatchJob,
    result: BatchResult,
    outputs: Vec<R>,
    started: Instant,
}

impl<'a, R> BatchRun<'a, R> {
    fn start(manager: &'a ErrorPropagationManager, job: &'a BatchJob, total: usize) -> Self {
        let result = BatchResult::new(&job.batch_id, &job.stage, &job.operation, total)
            .with_context(job.context.clone());
        Self { manager, job, result, outputs: Vec::new(), started: Instant::now() }
    }

    fn item_context(&self, index: usize) -> ItemContext {
        let mut context = self.job.context.clone();
        context.insert("item_index".into(), index.into());
        context.insert("batch_id".into(), self.job.batch_id.clone().into());
        ItemContext {
            index,
            batch_id: self.job.batch_id.clone(),
            stage: self.job.stage.clone(),
            operation: self.job.operation.clone(),
            context,
        }
    }

    /// Apply one outcome; false means stop before the next item
    fn settle<E>(&mut self, outcome: Result<Option<R>, E>, ctx: &ItemContext) -> bool
    where
        E: ErrorClassification + fmt::Display + 'static,
    {
        let failed = match outcome {
            Ok(Some(value)) => {
                self.result.record_success();
                self.outputs.push(value);
                false
            }
            Ok(None) => {
                self.result.record_skip();
                false
            }
            Err(err) => {
                debug!(index = ctx.index, error = %err, "Batch item failed");
                let mut record = ErrorRecord::capture(&err, &ctx.stage, &ctx.operation);
                record.batch_id.get_or_insert_with(|| ctx.batch_id.clone());
                record.merge_missing_context(&ctx.context);
                self.result.record_failure(record);
                true
            }
        };

        let keep_going = !(failed && !self.manager.config().continue_on_error)
            && self.manager.should_continue_batch(&self.result);
        if !keep_going && ctx.index + 1 < self.result.total_items() {
            self.result.mark_stopped_early();
        }
        keep_going
    }

    fn finish(mut self) -> ProcessedBatch<R> {
        self.result.finish(self.started.elapsed());
        self.manager.record_batch_result(self.result.clone());
        ProcessedBatch { result: self.result, outputs: self.outputs }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the batch processor
    //!
    //! Tests cover the mixed-outcome batch, early stops from both the
    //! continue-on-error flag and the propagation manager, and the async
    //! variant.

    use keel_common::error::{CommonError, FailureOrigin};

    use super::*;
    use crate::config::PropagationConfig;

    fn processor(config: PropagationConfig) -> BatchProcessor {
        BatchProcessor::new(Arc::new(ErrorPropagationManager::new(config)))
    }

    /// Validates a batch with one failing item.
    ///
    /// # Test Steps
    /// 1. Process items 1..=5 where item 3 fails with a `ValueError`
    /// 2. Verify total 5, successful 4, failed 1, success rate 80.0
    /// 3. Verify the error record carries batch id and item index
    #[test]
    fn test_single_failure_does_not_stop_batch() {
        let processor = processor(PropagationConfig::default());
        let job = BatchJob::new("ingest", "parse").with_batch_id("batch-3");

        let batch = processor.process(&job, vec![1, 2, 3, 4, 5], |item, _ctx| {
            if item == 3 {
                Err(ErrorRecord::new(FailureOrigin::Validation, "ValueError", "bad item 3", "ingest", "parse"))
            } else {
                Ok(Some(item * 10))
            }
        });

        let result = &batch.result;
        assert_eq!(result.total_items(), 5);
        assert_eq!(result.successful_items(), 4);
        assert_eq!(result.failed_items(), 1);
        assert!((result.success_rate() - 80.0).abs() < f64::EPSILON);
        assert!(!result.stopped_early());
        assert_eq!(batch.outputs, vec![10, 20, 40, 50]);

        let error = &result.errors()[0];
        assert_eq!(error.error_type, "ValueError");
        assert_eq!(error.batch_id.as_deref(), Some("batch-3"));
        assert_eq!(error.context.get("item_index"), Some(&serde_json::json!(2)));
        assert_eq!(processor.manager().batch_history().len(), 1);
    }

    /// Validates a structured record returned by an item keeps its provenance.
    ///
    /// Assertions:
    /// - Confirms entity id, message and the record's own context survive.
    /// - Confirms the batch id and item index are filled in.
    #[test]
    fn test_returned_record_keeps_entity_and_context() {
        let processor = processor(PropagationConfig::default());
        let job = BatchJob::new("scrape", "fetch_url").with_batch_id("batch-9");

        let batch = processor.process(&job, ["biz-7"], |entity, _ctx| {
            Err::<Option<()>, _>(
                ErrorRecord::new(FailureOrigin::Timeout, "ConnectionTimeout", "timed out", "scrape", "fetch_url")
                    .with_entity_id(entity)
                    .with_destination("directory")
                    .with_context("url", "https://example.test"),
            )
        });

        let error = &batch.result.errors()[0];
        assert_eq!(error.entity_id.as_deref(), Some("biz-7"));
        assert_eq!(error.destination.as_deref(), Some("directory"));
        assert_eq!(error.message, "timed out");
        assert_eq!(error.batch_id.as_deref(), Some("batch-9"));
        assert_eq!(error.context.get("url"), Some(&serde_json::json!("https://example.test")));
        assert_eq!(error.context.get("item_index"), Some(&serde_json::json!(0)));
    }

    #[test]
    fn test_skips_are_not_failures() {
        let processor = processor(PropagationConfig::default());
        let job = BatchJob::new("ingest", "dedupe");
        let batch = processor.process(&job, 0..4, |item, _ctx| {
            Ok::<_, CommonError>(if item % 2 == 0 { Some(item) } else { None })
        });
        assert_eq!(batch.result.successful_items(), 2);
        assert_eq!(batch.result.skipped_items(), 2);
        assert!(!batch.result.has_failures());
    }

    #[test]
    fn test_continue_on_error_false_stops_at_first_failure() {
        let processor = processor(PropagationConfig {
            continue_on_error: false,
            ..PropagationConfig::default()
        });
        let job = BatchJob::new("export", "write");
        let mut attempted = Vec::new();
        let batch = processor.process(&job, 0..10, |item, _ctx| {
            attempted.push(item);
            if item == 1 {
                Err(CommonError::resource("disk", "full"))
            } else {
                Ok(Some(()))
            }
        });
        assert_eq!(attempted, vec![0, 1]);
        assert_eq!(batch.result.processed_items(), 2);
        assert!(batch.result.stopped_early());
    }

    /// Validates the critical short-circuit leaves remaining items untouched.
    ///
    /// Assertions:
    /// - Confirms processing halts right after the critical item.
    /// - Confirms unattempted items are neither failed nor successful.
    #[test]
    fn test_critical_error_halts_batch() {
        let processor = processor(PropagationConfig::default());
        let job = BatchJob::new("billing", "charge");
        let batch = processor.process(&job, 0..6, |item, _ctx| {
            if item == 2 {
                Err(CommonError::internal("ledger mismatch"))
            } else {
                Ok(Some(item))
            }
        });
        let result = &batch.result;
        assert!(result.has_critical_errors());
        assert_eq!(result.successful_items(), 2);
        assert_eq!(result.failed_items(), 1);
        assert!(result.processed_items() < result.total_items());
        assert!(result.stopped_early());
    }

    #[test]
    fn test_error_rate_threshold_halts_batch() {
        let processor = processor(PropagationConfig {
            max_error_threshold: 0.2,
            ..PropagationConfig::default()
        });
        let job = BatchJob::new("scrape", "fetch");
        let batch = processor.process(&job, 0..10, |item, _ctx| {
            if item < 3 {
                Err(CommonError::network("site", "refused"))
            } else {
                Ok(Some(item))
            }
        });
        // 3/10 exceeds 0.2 once the third failure lands
        assert_eq!(batch.result.failed_items(), 3);
        assert_eq!(batch.result.processed_items(), 3);
    }

    #[tokio::test]
    async fn test_async_variant_shares_rules() {
        let processor = processor(PropagationConfig::default());
        let job = BatchJob::new("enrich", "lookup").with_context("source", "crm");
        let batch = processor
            .process_async(&job, vec!["a", "b", "c"], |item, ctx| async move {
                assert_eq!(ctx.context.get("source"), Some(&serde_json::json!("crm")));
                if item == "b" {
                    Err(CommonError::timeout("lookup", std::time::Duration::from_secs(1)))
                } else {
                    Ok(Some(item.to_uppercase()))
                }
            })
            .await;
        assert_eq!(batch.outputs, vec!["A", "C"]);
        assert_eq!(batch.result.failed_items(), 1);
        assert_eq!(batch.result.errors()[0].error_type, "TimeoutError");
    }
}
