//! Storage and catalog doubles for failure-path and interleaving tests.

use async_trait::async_trait;
use bytes::Bytes;
use depot_metadata::{
    CatalogStats, DecrementOutcome, EntryFilter, EntryRepo, EntryRow, MemoryStore, MetadataError,
    MetadataResult, MetadataStore, NewEntry, Pagination,
};
use depot_storage::MemoryBackend;
use depot_storage::error::{StorageError, StorageResult};
use depot_storage::traits::{ObjectStore, StreamingUpload};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;
use uuid::Uuid;

/// Backend that can be switched into a "disk full" mode for writes.
///
/// Reads, deletes and listings always go to an inner [`MemoryBackend`], so a
/// test can check that a failed upload left no blob behind and that a later
/// upload succeeds once writes are allowed again.
#[allow(dead_code)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    fail_writes: AtomicBool,
    aborts: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FlakyBackend {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            fail_writes: AtomicBool::new(true),
            aborts: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

fn disk_full() -> StorageError {
    StorageError::Io(std::io::Error::other("disk full"))
}

#[async_trait]
impl ObjectStore for FlakyBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Ok(Box::new(FailingUpload {
                aborts: self.aborts.clone(),
            }));
        }
        self.inner.put_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

struct FailingUpload {
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamingUpload for FailingUpload {
    async fn write(&mut self, _data: Bytes) -> StorageResult<()> {
        Err(disk_full())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        Err(disk_full())
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory backend that parks the first `delete` or upload `finish` until the
/// test releases it.
///
/// Lets a test interleave a second coordinator call with one that is stuck
/// mid-way through a blob operation.
#[allow(dead_code)]
pub struct GatedBackend {
    pub inner: MemoryBackend,
    gate_delete: AtomicBool,
    gate_finish: Arc<AtomicBool>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[allow(dead_code)]
impl GatedBackend {
    fn new(gate_delete: bool, gate_finish: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            gate_delete: AtomicBool::new(gate_delete),
            gate_finish: Arc::new(AtomicBool::new(gate_finish)),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        })
    }

    /// Park the first delete.
    pub fn on_delete() -> Arc<Self> {
        Self::new(true, false)
    }

    /// Park the first upload just before it becomes visible.
    pub fn on_finish() -> Arc<Self> {
        Self::new(false, true)
    }

    /// Wait until an operation is parked at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked operation continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl ObjectStore for GatedBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let upload = self.inner.put_stream(key).await?;
        Ok(Box::new(GatedUpload {
            upload,
            gate: self.gate_finish.clone(),
            entered: self.entered.clone(),
            release: self.release.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.gate_delete.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "gated"
    }
}

struct GatedUpload {
    upload: Box<dyn StreamingUpload>,
    gate: Arc<AtomicBool>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl StreamingUpload for GatedUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.upload.write(data).await
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let this = *self;
        if this.gate.swap(false, Ordering::SeqCst) {
            this.entered.notify_one();
            this.release.notified().await;
        }
        this.upload.finish().await
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.upload.abort().await
    }
}

/// In-memory catalog whose unconditional `delete_entry` always fails, so a
/// failed blob write cannot be rolled back.
#[allow(dead_code)]
pub struct UndeletableCatalog {
    pub inner: MemoryStore,
}

#[allow(dead_code)]
impl UndeletableCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
        })
    }
}

#[async_trait]
impl EntryRepo for UndeletableCatalog {
    async fn find_by_digest(&self, digest: &str) -> MetadataResult<Option<EntryRow>> {
        self.inner.find_by_digest(digest).await
    }

    async fn get_entry(&self, id: Uuid) -> MetadataResult<Option<EntryRow>> {
        self.inner.get_entry(id).await
    }

    async fn create_or_increment(&self, entry: &NewEntry) -> MetadataResult<(EntryRow, bool)> {
        self.inner.create_or_increment(entry).await
    }

    async fn decrement_or_delete(
        &self,
        digest: &str,
        id: Uuid,
    ) -> MetadataResult<DecrementOutcome> {
        self.inner.decrement_or_delete(digest, id).await
    }

    async fn delete_entry(&self, _id: Uuid) -> MetadataResult<Option<EntryRow>> {
        Err(MetadataError::Internal("database is locked".to_string()))
    }

    async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: Pagination,
    ) -> MetadataResult<Vec<EntryRow>> {
        self.inner.list_entries(filter, page).await
    }

    async fn count_entries(&self, filter: &EntryFilter) -> MetadataResult<u64> {
        self.inner.count_entries(filter).await
    }

    async fn aggregate_stats(&self) -> MetadataResult<CatalogStats> {
        self.inner.aggregate_stats().await
    }
}

#[async_trait]
impl MetadataStore for UndeletableCatalog {
    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "undeletable"
    }
}
