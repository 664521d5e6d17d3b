//! Domain types and models
//!
//! - [`error_record`]: one classified failure observation
//! - [`batch`]: outcome of processing N items as one unit
//! - [`pattern`]: recurring-failure groupings derived from records
//! - [`metrics`]: windowed metrics and summaries
//! - [`alerts`]: alert rules and fired alerts
//! - [`retry`]: delayed redelivery items and event records
//! - [`context`]: structured context maps

pub mod alerts;
pub mod batch;
pub mod context;
pub mod error_record;
pub mod metrics;
pub mod pattern;
pub mod retry;

pub use alerts::{AlertLevel, AlertMetric, AlertThreshold, FiredAlert};
pub use batch::BatchResult;
pub use context::{ContextMap, ContextValue};
pub use error_record::ErrorRecord;
pub use metrics::{ErrorMetrics, ErrorSummary, PropagationSummary};
pub use pattern::{ErrorPattern, PatternKey};
pub use retry::{EventRecord, EventStatus, Priority, RetryQueueItem};
