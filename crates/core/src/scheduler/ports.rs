//! Port interfaces for delayed redelivery
//!
//! These traits define the boundary between the scheduler and the storage
//! and delivery implementations that live in infrastructure.

use async_trait::async_trait;
use keel_common::error::CommonError;
use keel_domain::{EventRecord, KeelError, Result, RetryQueueItem};

/// Durable storage for pending retries and event records
///
/// Every method is present on every store. Stores that cannot keep event
/// records leave the default implementations, which report
/// [`KeelError::NotSupported`].
#[async_trait]
pub trait RetryStore: Send + Sync {
    /// Insert or replace the pending item under its key
    async fn store_retry(&self, item: &RetryQueueItem) -> Result<()>;

    async fn get_retry(&self, key: &str) -> Result<Option<RetryQueueItem>>;

    /// Remove the pending item; removing an absent key is not an error
    async fn remove_retry(&self, key: &str) -> Result<()>;

    async fn get_retries_for_destination(&self, destination: &str) -> Result<Vec<RetryQueueItem>>;

    /// Every pending item, used to rebuild the queue on start
    async fn list_retries(&self) -> Result<Vec<RetryQueueItem>>;

    async fn get_event(&self, _event_id: &str, _destination: &str) -> Result<Option<EventRecord>> {
        Err(KeelError::NotSupported("get_event".into()))
    }

    async fn update_event(&self, _record: &EventRecord) -> Result<()> {
        Err(KeelError::NotSupported("update_event".into()))
    }
}

/// Performs one redelivery attempt
#[async_trait]
pub trait Redeliverer: Send + Sync {
    async fn redeliver(&self, item: &RetryQueueItem) -> std::result::Result<(), CommonError>;
}
