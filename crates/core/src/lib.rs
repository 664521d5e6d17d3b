//! # Keel Core
//!
//! Failure-handling services built on the Keel domain model.
//!
//! This crate contains:
//! - Batch error propagation (continue/stop decisions and batch history)
//! - Error aggregation (windowed metrics, pattern detection, alerting)
//! - Delayed retry scheduling with per-destination breakers
//! - The unified [`KeelConfig`]
//!
//! ## Architecture Principles
//! - Depends only on `keel-common` and `keel-domain`
//! - No file, network or platform code
//! - Storage and delivery reach the scheduler through port traits
//!   ([`RetryStore`], [`Redeliverer`])

pub mod aggregation;
pub mod config;
pub mod propagation;
pub mod scheduler;

pub use aggregation::ErrorAggregator;
pub use config::{AggregatorConfig, KeelConfig, LoggingConfig, PropagationConfig, SchedulerConfig};
pub use propagation::{BatchJob, BatchProcessor, ErrorPropagationManager, ItemContext, ProcessedBatch};
pub use scheduler::{
    QueueStats, Redeliverer, RetryScheduler, RetryStore, SchedulerError, SweepReport,
};
