//! Delayed retry scheduling
//!
//! Failed deliveries are queued per destination with a priority and an
//! eligibility time, persisted through [`RetryStore`], and redelivered by a
//! background sweep through [`Redeliverer`].

pub mod ports;
pub mod priority;
pub mod queue;
pub mod service;

pub use ports::{Redeliverer, RetryStore};
pub use priority::PriorityRules;
pub use queue::RetryQueue;
pub use service::{QueueStats, RetryScheduler, SchedulerError, SweepReport};
