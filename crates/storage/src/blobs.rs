//! Digest-addressed blob access on top of an [`ObjectStore`].

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use depot_core::{BlobKey, ContentHash};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument, warn};

/// Blob store keyed by [`BlobKey`].
///
/// Holds no state of its own; every call goes straight to the object store.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
}

impl BlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Underlying object store.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Store a fully buffered blob under the key derived from `digest`.
    pub async fn put(
        &self,
        digest: &ContentHash,
        extension: Option<&str>,
        data: Bytes,
    ) -> StorageResult<BlobKey> {
        let key = BlobKey::new(digest, extension);
        self.store.put(key.as_str(), data).await?;
        Ok(key)
    }

    /// Copy `reader` into the blob at `key` in `chunk_size` pieces.
    ///
    /// The blob only becomes visible once every byte has been written. Any
    /// read or write failure aborts the upload and leaves nothing behind.
    #[instrument(skip(self, reader))]
    pub async fn write_stream<R>(
        &self,
        key: &BlobKey,
        reader: &mut R,
        chunk_size: usize,
    ) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut upload = self.store.put_stream(key.as_str()).await?;
        let mut buf = vec![0u8; chunk_size.max(1)];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    if let Err(abort_err) = upload.abort().await {
                        warn!(error = %abort_err, "failed to abort blob upload");
                    }
                    return Err(StorageError::Io(e));
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = upload.write(Bytes::copy_from_slice(&buf[..n])).await {
                if let Err(abort_err) = upload.abort().await {
                    warn!(error = %abort_err, "failed to abort blob upload");
                }
                return Err(e);
            }
        }

        let written = upload.finish().await?;
        debug!(bytes = written, "blob written");
        Ok(written)
    }

    pub async fn get(&self, key: &BlobKey) -> StorageResult<Bytes> {
        self.store.get(key.as_str()).await
    }

    pub async fn exists(&self, key: &BlobKey) -> StorageResult<bool> {
        self.store.exists(key.as_str()).await
    }

    /// Delete a blob. Deleting a missing blob succeeds.
    pub async fn delete(&self, key: &BlobKey) -> StorageResult<()> {
        self.store.delete(key.as_str()).await
    }

    /// Check that the blob at `key` hashes to `digest`.
    pub async fn verify(&self, key: &BlobKey, digest: &ContentHash) -> StorageResult<bool> {
        let data = self.store.get(key.as_str()).await?;
        Ok(ContentHash::compute(&data) == *digest)
    }
}
