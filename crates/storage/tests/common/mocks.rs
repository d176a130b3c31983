use async_trait::async_trait;
use bytes::Bytes;
use depot_storage::MemoryBackend;
use depot_storage::error::{StorageError, StorageResult};
use depot_storage::traits::{ObjectStore, StreamingUpload};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend whose streaming uploads fail after a fixed number of chunk writes.
///
/// Everything else is delegated to an inner [`MemoryBackend`], so tests can
/// check that a failed upload left nothing behind.
#[allow(dead_code)]
pub struct FailingWriteBackend {
    pub inner: MemoryBackend,
    pub fail_after_writes: usize,
    pub aborts: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FailingWriteBackend {
    pub fn new(fail_after_writes: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            fail_after_writes,
            aborts: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FailingWriteBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, _key: &str, _data: Bytes) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::other("disk full")))
    }

    async fn put_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(FailingUpload {
            remaining: self.fail_after_writes,
            aborts: self.aborts.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

struct FailingUpload {
    remaining: usize,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamingUpload for FailingUpload {
    async fn write(&mut self, _data: Bytes) -> StorageResult<()> {
        if self.remaining == 0 {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.remaining -= 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        Err(StorageError::Io(std::io::Error::other("disk full")))
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
