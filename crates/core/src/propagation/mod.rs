//! Batch-level error propagation
//!
//! [`ErrorPropagationManager`] owns the continue/stop rule and the history
//! of finished batches; [`BatchProcessor`] drives items through a function
//! and applies that rule after every item.

pub mod manager;
pub mod processor;

pub use manager::ErrorPropagationManager;
pub use processor::{BatchJob, BatchProcessor, ItemContext, ProcessedBatch};
