//! Shared test helpers for `keel-core` integration tests.
//!
//! Lightweight in-memory ports so scheduler flows can be exercised without
//! the infrastructure crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use keel_common::error::CommonError;
use keel_core::{Redeliverer, RetryStore};
use keel_domain::{Result as DomainResult, RetryQueueItem};
use parking_lot::Mutex;

/// Pending-retry store keyed by `destination:event_id`; keeps no event records.
#[derive(Default)]
pub struct MemoryRetryStore {
    items: Mutex<HashMap<String, RetryQueueItem>>,
}

impl MemoryRetryStore {
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[async_trait]
impl RetryStore for MemoryRetryStore {
    async fn store_retry(&self, item: &RetryQueueItem) -> DomainResult<()> {
        self.items.lock().insert(item.key(), item.clone());
        Ok(())
    }

    async fn get_retry(&self, key: &str) -> DomainResult<Option<RetryQueueItem>> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn remove_retry(&self, key: &str) -> DomainResult<()> {
        self.items.lock().remove(key);
        Ok(())
    }

    async fn get_retries_for_destination(&self, destination: &str) -> DomainResult<Vec<RetryQueueItem>> {
        Ok(self.items.lock().values().filter(|i| i.destination == destination).cloned().collect())
    }

    async fn list_retries(&self) -> DomainResult<Vec<RetryQueueItem>> {
        Ok(self.items.lock().values().cloned().collect())
    }
}

/// Redeliverer that always succeeds and counts calls.
#[derive(Default)]
pub struct CountingRedeliverer {
    calls: AtomicUsize,
}

impl CountingRedeliverer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Redeliverer for CountingRedeliverer {
    async fn redeliver(&self, _item: &RetryQueueItem) -> Result<(), CommonError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
