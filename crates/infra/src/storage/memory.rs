//! In-process [`RetryStore`] with event record support
//!
//! Nothing survives a restart; meant for tests, single-process deployments
//! and as the default when no durable store is configured.

use std::collections::BTreeMap;

use async_trait::async_trait;
use keel_core::RetryStore;
use keel_domain::{EventRecord, Result as DomainResult, RetryQueueItem};
use parking_lot::RwLock;

/// Pending retries and event records held in memory
#[derive(Debug, Default)]
pub struct InMemoryRetryStore {
    retries: RwLock<BTreeMap<String, RetryQueueItem>>,
    events: RwLock<BTreeMap<String, EventRecord>>,
}

impl InMemoryRetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.retries.read().len()
    }

    /// Seed or overwrite an event record directly
    pub fn insert_event(&self, record: EventRecord) {
        self.events.write().insert(record.key(), record);
    }
}

#[async_trait]
impl RetryStore for InMemoryRetryStore {
    async fn store_retry(&self, item: &RetryQueueItem) -> DomainResult<()> {
        self.retries.write().insert(item.key(), item.clone());
        Ok(())
    }

    async fn get_retry(&self, key: &str) -> DomainResult<Option<RetryQueueItem>> {
        Ok(self.retries.read().get(key).cloned())
    }

    async fn remove_retry(&self, key: &str) -> DomainResult<()> {
        self.retries.write().remove(key);
        Ok(())
    }

    async fn get_retries_for_destination(&self, destination: &str) -> DomainResult<Vec<RetryQueueItem>> {
        Ok(self
            .retries
            .read()
            .values()
            .filter(|item| item.destination == destination)
            .cloned()
            .collect())
    }

    async fn list_retries(&self) -> DomainResult<Vec<RetryQueueItem>> {
        Ok(self.retries.read().values().cloned().collect())
    }

    async fn get_event(&self, event_id: &str, destination: &str) -> DomainResult<Option<EventRecord>> {
        let key = RetryQueueItem::key_for(destination, event_id);
        Ok(self.events.read().get(&key).cloned())
    }

    async fn update_event(&self, record: &EventRecord) -> DomainResult<()> {
        self.events.write().insert(record.key(), record.clone());
        Ok(())
    }
}
