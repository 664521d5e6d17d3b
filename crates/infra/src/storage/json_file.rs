//! [`RetryStore`] persisted to a single JSON file
//!
//! The whole pending set is rewritten on every change: serialized to a
//! sibling temp file, flushed, then renamed over the target, so a crash
//! leaves either the old or the new file and never a torn one. A write that
//! fails leaves the in-memory view unchanged.
//!
//! Event records are not kept; the default `NotSupported` implementations
//! apply.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keel_core::RetryStore;
use keel_domain::{KeelError, Result as DomainResult, RetryQueueItem};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    retries: Vec<RetryQueueItem>,
}

/// File-backed pending-retry store
#[derive(Debug)]
pub struct JsonFileRetryStore {
    path: PathBuf,
    retries: Mutex<BTreeMap<String, RetryQueueItem>>,
}

impl JsonFileRetryStore {
    /// Open the store at `path`, loading any pending retries already there
    ///
    /// A missing file is an empty store; it is created on the first write.
    ///
    /// # Errors
    /// Returns `KeelError::Storage` if the file exists but cannot be read or
    /// parsed.
    pub async fn open(path: impl Into<PathBuf>) -> DomainResult<Self> {
        let path = path.into();
        let read_path = path.clone();
        let file = task::spawn_blocking(move || read_store_file(&read_path))
            .await
            .map_err(|e| KeelError::Internal(format!("retry store load task failed: {e}")))??;

        let retries: BTreeMap<_, _> =
            file.retries.into_iter().map(|item| (item.key(), item)).collect();
        info!(path = %path.display(), pending = retries.len(), "Opened JSON retry store");
        Ok(Self { path, retries: Mutex::new(retries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn pending_count(&self) -> usize {
        self.retries.lock().await.len()
    }

    async fn persist(&self, retries: &BTreeMap<String, RetryQueueItem>) -> DomainResult<()> {
        let file = StoreFile { version: FORMAT_VERSION, retries: retries.values().cloned().collect() };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| KeelError::Storage(format!("failed to encode retry store: {e}")))?;
        let path = self.path.clone();
        task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| KeelError::Internal(format!("retry store write task failed: {e}")))??;
        debug!(path = %self.path.display(), pending = retries.len(), "Retry store persisted");
        Ok(())
    }

    /// Apply `change` to a copy of the pending set and commit it once the
    /// file write succeeds
    async fn update<F>(&self, change: F) -> DomainResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, RetryQueueItem>) -> bool,
    {
        let mut retries = self.retries.lock().await;
        let mut next = retries.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next).await?;
        *retries = next;
        Ok(())
    }
}

fn read_store_file(path: &Path) -> DomainResult<StoreFile> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::default()),
        Err(err) => {
            return Err(KeelError::Storage(format!("failed to read {}: {err}", path.display())));
        }
    };
    if contents.iter().all(u8::is_ascii_whitespace) {
        return Ok(StoreFile::default());
    }
    let file: StoreFile = serde_json::from_slice(&contents)
        .map_err(|e| KeelError::Storage(format!("corrupt retry store {}: {e}", path.display())))?;
    if file.version > FORMAT_VERSION {
        return Err(KeelError::Storage(format!(
            "retry store {} has unsupported version {}",
            path.display(),
            file.version
        )));
    }
    Ok(file)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> DomainResult<()> {
    let storage = |context: &str, err: std::io::Error| {
        KeelError::Storage(format!("{context} {}: {err}", path.display()))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| storage("failed to create directory for", e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut tmp = std::fs::File::create(&tmp_path).map_err(|e| storage("failed to create temp file for", e))?;
    tmp.write_all(bytes).map_err(|e| storage("failed to write temp file for", e))?;
    tmp.sync_all().map_err(|e| storage("failed to flush temp file for", e))?;
    drop(tmp);

    std::fs::rename(&tmp_path, path).map_err(|e| storage("failed to replace", e))
}

#[async_trait]
impl RetryStore for JsonFileRetryStore {
    async fn store_retry(&self, item: &RetryQueueItem) -> DomainResult<()> {
        let item = item.clone();
        self.update(|retries| {
            retries.insert(item.key(), item);
            true
        })
        .await
    }

    async fn get_retry(&self, key: &str) -> DomainResult<Option<RetryQueueItem>> {
        Ok(self.retries.lock().await.get(key).cloned())
    }

    async fn remove_retry(&self, key: &str) -> DomainResult<()> {
        self.update(|retries| retries.remove(key).is_some()).await
    }

    async fn get_retries_for_destination(&self, destination: &str) -> DomainResult<Vec<RetryQueueItem>> {
        Ok(self
            .retries
            .lock()
            .await
            .values()
            .filter(|item| item.destination == destination)
            .cloned()
            .collect())
    }

    async fn list_retries(&self) -> DomainResult<Vec<RetryQueueItem>> {
        Ok(self.retries.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the JSON file retry store
    //!
    //! Every test works in its own temp directory.

    use chrono::Utc;
    use keel_domain::Priority;
    use tempfile::TempDir;

    use super::*;

    fn item(event: &str, destination: &str, priority: Priority) -> RetryQueueItem {
        let now = Utc::now();
        RetryQueueItem {
            event_id: event.into(),
            destination: destination.into(),
            attempt: 2,
            next_eligible_at: now,
            priority,
            error_count: 2,
            last_error: "connection reset".into(),
            created_at: now,
        }
    }

    /// Validates pending retries survive reopening the store.
    ///
    /// # Test Steps
    /// 1. Store two items and remove one
    /// 2. Reopen the store from the same path
    /// 3. Verify only the surviving item is loaded, unchanged
    #[tokio::test]
    async fn test_pending_retries_survive_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("retries.json");

        let store = JsonFileRetryStore::open(&path).await.expect("open");
        let kept = item("a", "stripe", Priority::Critical);
        store.store_retry(&kept).await.expect("store");
        store.store_retry(&item("b", "mailgun", Priority::Low)).await.expect("store");
        store.remove_retry("mailgun:b").await.expect("remove");
        assert!(path.exists());
        assert!(!path.with_file_name("retries.json.tmp").exists());

        let reopened = JsonFileRetryStore::open(&path).await.expect("reopen");
        let loaded = reopened.list_retries().await.expect("list");
        assert_eq!(loaded, vec![kept]);
    }

    #[tokio::test]
    async fn test_missing_and_empty_files_open_empty() {
        let dir = TempDir::new().expect("temp dir");
        let missing = JsonFileRetryStore::open(dir.path().join("absent.json")).await.expect("open");
        assert_eq!(missing.pending_count().await, 0);

        let empty_path = dir.path().join("empty.json");
        std::fs::write(&empty_path, "\n").expect("write");
        let empty = JsonFileRetryStore::open(&empty_path).await.expect("open");
        assert_eq!(empty.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_storage_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("retries.json");
        std::fs::write(&path, "{ not json").expect("write");

        let err = JsonFileRetryStore::open(&path).await.expect_err("corrupt");
        assert!(matches!(err, KeelError::Storage(ref msg) if msg.contains("corrupt")));
    }

    #[tokio::test]
    async fn test_event_records_are_not_supported() {
        let dir = TempDir::new().expect("temp dir");
        let store = JsonFileRetryStore::open(dir.path().join("retries.json")).await.expect("open");
        let err = store.get_event("evt", "stripe").await.expect_err("unsupported");
        assert!(matches!(err, KeelError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_destination_filter() {
        let dir = TempDir::new().expect("temp dir");
        let store = JsonFileRetryStore::open(dir.path().join("retries.json")).await.expect("open");
        store.store_retry(&item("a", "stripe", Priority::Critical)).await.expect("store");
        store.store_retry(&item("b", "mailgun", Priority::Normal)).await.expect("store");

        let stripe = store.get_retries_for_destination("stripe").await.expect("list");
        assert_eq!(stripe.len(), 1);
        assert_eq!(stripe[0].event_id, "a");
    }
}
