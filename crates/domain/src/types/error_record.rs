//! Classified failure observations
//!
//! An [`ErrorRecord`] is created the moment an operation fails. Its
//! classification (severity, category, retry hint, recoverability) is fixed
//! at construction and cannot be changed afterwards; only the retry counter
//! moves, and only upwards.

use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};
use keel_common::error::{
    ErrorCategory, ErrorClassification, ErrorSeverity, FailureOrigin, RetryStrategy,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::ContextMap;
use crate::constants::DEFAULT_MAX_RETRIES;

/// One failure observation with provenance and classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,

    // Provenance
    pub stage: String,
    pub operation: String,
    pub batch_id: Option<String>,
    pub destination: Option<String>,
    /// Business entity the failing work was about
    pub entity_id: Option<String>,

    // Classification, fixed at construction
    pub error_type: String,
    origin: FailureOrigin,
    severity: ErrorSeverity,
    category: ErrorCategory,
    retry_strategy: RetryStrategy,
    recoverable: bool,

    // Payload
    pub message: String,
    #[serde(default)]
    pub context: ContextMap,
    pub stack_trace: Option<String>,
    retry_count: u32,
    pub max_retries: u32,
}

impl ErrorRecord {
    /// Record a failure whose origin is known at the point of failure
    pub fn new(
        origin: FailureOrigin,
        error_type: impl Into<String>,
        message: impl Into<String>,
        stage: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            stage: stage.into(),
            operation: operation.into(),
            batch_id: None,
            destination: None,
            entity_id: None,
            error_type: error_type.into(),
            origin,
            severity: origin.severity(),
            category: origin.category(),
            retry_strategy: origin.retry_strategy(),
            recoverable: origin.is_recoverable(),
            message: message.into(),
            context: ContextMap::new(),
            stack_trace: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Record a failure from any classified error
    ///
    /// Severity, category and recoverability are taken from the error. The
    /// retry hint is the error's own hint when it carries one, otherwise the
    /// hint of the origin matching its category; unrecoverable errors never
    /// carry a hint.
    pub fn from_error<E>(error: &E, stage: impl Into<String>, operation: impl Into<String>) -> Self
    where
        E: ErrorClassification + fmt::Display + ?Sized,
    {
        let category = error.category();
        let severity = error.severity();
        let recoverable = error.is_recoverable();
        let origin = if severity == ErrorSeverity::Critical && !recoverable {
            FailureOrigin::CriticalRuntime
        } else {
            FailureOrigin::for_category(category)
        };
        let retry_strategy = if recoverable {
            error.retry_hint().unwrap_or_else(|| origin.retry_strategy())
        } else {
            RetryStrategy::None
        };

        let mut record = Self::new(origin, error.error_type(), error.to_string(), stage, operation);
        record.severity = severity;
        record.category = category;
        record.retry_strategy = retry_strategy;
        record.recoverable = recoverable;
        record
    }

    /// Record `error`, keeping it unchanged when it already is an
    /// [`ErrorRecord`]
    ///
    /// A record returned as an error keeps its provenance, context, message
    /// and classification; any other error goes through
    /// [`from_error`](Self::from_error).
    pub fn capture<E>(error: &E, stage: impl Into<String>, operation: impl Into<String>) -> Self
    where
        E: ErrorClassification + fmt::Display + 'static,
    {
        match (error as &dyn Any).downcast_ref::<Self>() {
            Some(record) => record.clone(),
            None => Self::from_error(error, stage, operation),
        }
    }

    /// Add context entries without overwriting keys the record already has
    pub fn merge_missing_context(&mut self, context: &ContextMap) {
        for (key, value) in context {
            self.context.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Merge a whole map; existing keys are overwritten
    pub fn with_context_map(mut self, context: ContextMap) -> Self {
        self.context.extend(context);
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the observation time (replays and backfills)
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub const fn origin(&self) -> FailureOrigin {
        self.origin
    }

    pub const fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    pub const fn retry_strategy(&self) -> RetryStrategy {
        self.retry_strategy
    }

    pub const fn recoverable(&self) -> bool {
        self.recoverable
    }

    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Count one more attempt and return the new total
    pub fn increment_retry(&mut self) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count
    }

    pub const fn can_retry(&self) -> bool {
        self.recoverable && self.retry_count < self.max_retries
    }

    pub fn is_critical_severity(&self) -> bool {
        self.severity == ErrorSeverity::Critical
    }
}

impl ErrorClassification for ErrorRecord {
    fn category(&self) -> ErrorCategory {
        self.category
    }

    fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    fn error_type(&self) -> &str {
        &self.error_type
    }

    fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    fn retry_hint(&self) -> Option<RetryStrategy> {
        Some(self.retry_strategy)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{} {}: {}",
            self.severity, self.stage, self.operation, self.error_type, self.message
        )
    }
}

impl std::error::Error for ErrorRecord {}
