//! Deduplicating upload coordinator.
//!
//! Every upload is hashed before anything is written. The catalog decides in a
//! single atomic step whether the digest is new (create) or known (increment);
//! only a creator writes the blob. A failed write undoes the creation, and a
//! blob is deleted only after the catalog entry that owned it is gone.
//!
//! Writes and deletes of one object key are serialized: a creator holds the
//! key's lock from its blob write through its ownership re-check, and a
//! remover holds it from its ownership check through the delete.

use crate::error::DedupError;
use crate::metrics;
use dashmap::DashMap;
use depot_core::{BlobKey, EntryId, hash_reader};
use depot_metadata::{
    DecrementOutcome, EntryFilter, EntryRow, MetadataError, MetadataStore, NewEntry, Pagination,
};
use depot_storage::BlobStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncSeek};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Client-supplied description of an upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Original filename. Only its extension influences storage.
    pub name: String,
    pub content_type: String,
    /// Size announced by the client, if any. Checked against the limit before
    /// reading; the stored size is always the measured one.
    pub declared_size: Option<u64>,
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The content was new and has been stored.
    Created { entry: EntryRow, saved_bytes: u64 },
    /// The content already existed; its reference count was incremented.
    Duplicate { entry: EntryRow, saved_bytes: u64 },
}

impl IngestOutcome {
    pub fn entry(&self) -> &EntryRow {
        match self {
            Self::Created { entry, .. } | Self::Duplicate { entry, .. } => entry,
        }
    }

    pub fn saved_bytes(&self) -> u64 {
        match self {
            Self::Created { saved_bytes, .. } | Self::Duplicate { saved_bytes, .. } => {
                *saved_bytes
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Result of a successful remove.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    /// The last reference was removed; entry and blob are gone.
    Deleted(EntryRow),
    /// Other references remain; the entry after the decrement.
    Decremented(EntryRow),
}

/// Storage usage summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    /// Bytes physically stored.
    pub total_used: u64,
    /// Number of distinct blobs.
    pub unique_files: u64,
    /// Bytes avoided by deduplication, summed per entry as `size - size / refs`.
    pub saved_space: f64,
    /// Bytes clients uploaded, counting every reference.
    pub logical_bytes: u64,
}

/// A page of listed entries.
#[derive(Debug, Clone)]
pub struct EntryPage {
    pub total: u64,
    pub entries: Vec<EntryRow>,
}

/// Log a catalog failure and fold it into an internal error.
///
/// The error detail stays in the log; the returned error only names the step.
fn catalog_error(context: &'static str, err: MetadataError) -> DedupError {
    error!(error = %err, "{context}");
    DedupError::Internal(context.to_string())
}

type BlobLocks = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive hold on one object key.
///
/// Dropping it releases the lock and frees the map slot once no other task
/// is waiting on it.
struct BlobLock<'a> {
    locks: &'a BlobLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BlobLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Coordinates hashing, the catalog and blob storage.
pub struct DedupCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    blob_locks: BlobLocks,
    max_upload_size: u64,
    chunk_size: usize,
}

impl DedupCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: BlobStore,
        max_upload_size: u64,
        chunk_size: usize,
    ) -> Self {
        Self {
            metadata,
            blobs,
            blob_locks: DashMap::new(),
            max_upload_size,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// Wait for exclusive use of the blob at `key`.
    async fn lock_blob(&self, key: &BlobKey) -> BlobLock<'_> {
        let lock = Arc::clone(&self.blob_locks.entry(key.as_str().to_string()).or_default());
        let guard = lock.lock_owned().await;
        BlobLock {
            locks: &self.blob_locks,
            key: key.as_str().to_string(),
            guard: Some(guard),
        }
    }

    /// Store an upload, or count another reference to identical stored content.
    pub async fn ingest<R>(
        &self,
        reader: &mut R,
        request: UploadRequest,
    ) -> Result<IngestOutcome, DedupError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send + ?Sized,
    {
        let started = Instant::now();
        let limit = self.max_upload_size;

        if let Some(declared) = request.declared_size
            && declared > limit
        {
            metrics::record_rejection("size_limit");
            return Err(DedupError::SizeLimitExceeded {
                size: declared,
                limit,
            });
        }

        let (digest, size) = hash_reader(reader, self.chunk_size, Some(limit))
            .await
            .map_err(|e| match e {
                depot_core::Error::SizeLimitExceeded { size, limit } => {
                    metrics::record_rejection("size_limit");
                    DedupError::SizeLimitExceeded { size, limit }
                }
                other => {
                    error!(error = %other, "failed to read upload");
                    DedupError::Internal("failed to read upload".to_string())
                }
            })?;

        if let Some(declared) = request.declared_size
            && declared != size
        {
            warn!(
                digest = %digest,
                declared_size = declared,
                measured_size = size,
                "declared upload size differs from content; recording measured size"
            );
        }

        let key = BlobKey::for_filename(&digest, &request.name);
        let size_bytes = i64::try_from(size).map_err(|_| {
            error!(size, "upload size out of range");
            DedupError::Internal("upload size out of range".to_string())
        })?;
        let proposed = NewEntry {
            id: Uuid::new_v4(),
            digest: digest.to_hex(),
            object_key: key.as_str().to_string(),
            original_name: request.name,
            content_type: request.content_type,
            size_bytes,
            created_at: OffsetDateTime::now_utc(),
        };

        let (entry, created) = self
            .metadata
            .create_or_increment(&proposed)
            .await
            .map_err(|e| catalog_error("failed to record upload", e))?;

        if !created {
            let saved_bytes = entry.size_bytes.max(0) as u64;
            metrics::UPLOADS_DEDUPLICATED.inc();
            metrics::BYTES_DEDUPLICATED.inc_by(saved_bytes);
            metrics::INGEST_DURATION.observe(started.elapsed().as_secs_f64());
            info!(
                digest = %entry.digest,
                entry_id = %entry.id,
                reference_count = entry.reference_count,
                "duplicate upload"
            );
            return Ok(IngestOutcome::Duplicate { entry, saved_bytes });
        }

        // The catalog row is visible from here on; the blob follows.
        let _blob_lock = self.lock_blob(&key).await;
        match self.blobs.write_stream(&key, reader, self.chunk_size).await {
            Ok(written) if written == size => {}
            Ok(written) => {
                warn!(
                    digest = %entry.digest,
                    hashed = size,
                    written,
                    "upload changed between hashing and storing"
                );
                if let Err(e) = self.blobs.delete(&key).await {
                    warn!(digest = %entry.digest, error = %e, "failed to delete mismatched blob");
                }
                return Err(self
                    .roll_back(&entry, format!("expected {size} bytes, wrote {written}"))
                    .await);
            }
            Err(e) => return Err(self.roll_back(&entry, e.to_string()).await),
        }

        // A remove may have deleted the entry while the blob was being written.
        match self.metadata.get_entry(entry.id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(
                    digest = %entry.digest,
                    entry_id = %entry.id,
                    "entry removed during blob write, deleting orphan blob"
                );
                self.delete_blob_if_unclaimed(&entry).await?;
                metrics::ORPHAN_BLOBS_DELETED.inc();
            }
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "could not confirm entry after blob write");
            }
        }

        metrics::UPLOADS_CREATED.inc();
        metrics::BYTES_STORED.inc_by(size);
        metrics::INGEST_DURATION.observe(started.elapsed().as_secs_f64());
        info!(
            digest = %entry.digest,
            entry_id = %entry.id,
            size_bytes = entry.size_bytes,
            "stored new content"
        );
        Ok(IngestOutcome::Created {
            entry,
            saved_bytes: 0,
        })
    }

    /// Undo the creation of `entry` after its blob could not be written.
    async fn roll_back(&self, entry: &EntryRow, cause: String) -> DedupError {
        metrics::ROLLBACKS.inc();
        match self.metadata.delete_entry(entry.id).await {
            Ok(Some(row)) => {
                if row.reference_count > 1 {
                    warn!(
                        digest = %row.digest,
                        dropped_references = row.reference_count - 1,
                        "rolled back entry had been referenced by concurrent uploads"
                    );
                }
                warn!(digest = %entry.digest, entry_id = %entry.id, cause = %cause, "rolled back upload");
                DedupError::StorageWriteFailed(cause)
            }
            Ok(None) => {
                debug!(entry_id = %entry.id, "entry already removed before rollback");
                DedupError::StorageWriteFailed(cause)
            }
            Err(e) => {
                error!(
                    digest = %entry.digest,
                    entry_id = %entry.id,
                    cause = %cause,
                    error = %e,
                    "rollback failed: catalog entry has no blob, manual reconciliation required"
                );
                DedupError::Internal("blob write failed and rollback failed".to_string())
            }
        }
    }

    /// Delete the blob of a removed entry unless its digest has been
    /// catalogued again under the same key in the meantime.
    ///
    /// The caller holds the blob lock for `entry`'s key.
    async fn delete_blob_if_unclaimed(&self, entry: &EntryRow) -> Result<(), DedupError> {
        match self.metadata.find_by_digest(&entry.digest).await {
            Ok(Some(current)) if current.object_key == entry.object_key => {
                debug!(digest = %entry.digest, "digest re-registered, keeping blob");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(catalog_error("failed to check blob ownership", e)),
        }

        self.blobs.delete(&entry.blob_key()).await.map_err(|e| {
            error!(
                digest = %entry.digest,
                object_key = %entry.object_key,
                error = %e,
                "entry deleted but blob remains, manual reconciliation required"
            );
            DedupError::Internal("failed to delete blob".to_string())
        })
    }

    /// Drop one reference to the entry `id`, deleting entry and blob at zero.
    pub async fn remove(&self, id: EntryId) -> Result<RemoveOutcome, DedupError> {
        let entry = self
            .metadata
            .get_entry(*id.as_uuid())
            .await
            .map_err(|e| catalog_error("failed to look up entry", e))?
            .ok_or_else(|| DedupError::NotFound(format!("file {id} not found")))?;

        let outcome = self
            .metadata
            .decrement_or_delete(&entry.digest, entry.id)
            .await
            .map_err(|e| catalog_error("failed to release entry", e))?;

        match outcome {
            DecrementOutcome::Decremented(row) => {
                metrics::record_removal("decremented");
                info!(
                    digest = %row.digest,
                    entry_id = %row.id,
                    reference_count = row.reference_count,
                    "released reference"
                );
                Ok(RemoveOutcome::Decremented(row))
            }
            DecrementOutcome::Deleted(row) => {
                // The catalog delete has committed; only now may the blob go.
                let _blob_lock = self.lock_blob(&row.blob_key()).await;
                self.delete_blob_if_unclaimed(&row).await?;
                metrics::record_removal("deleted");
                info!(digest = %row.digest, entry_id = %row.id, "deleted content");
                Ok(RemoveOutcome::Deleted(row))
            }
            DecrementOutcome::NotFound => Err(DedupError::NotFound(format!("file {id} not found"))),
        }
    }

    /// Look up one entry.
    pub async fn get(&self, id: EntryId) -> Result<EntryRow, DedupError> {
        self.metadata
            .get_entry(*id.as_uuid())
            .await
            .map_err(|e| catalog_error("failed to look up entry", e))?
            .ok_or_else(|| DedupError::NotFound(format!("file {id} not found")))
    }

    /// List entries matching `filter`, newest first.
    pub async fn list(
        &self,
        filter: &EntryFilter,
        page: Pagination,
    ) -> Result<EntryPage, DedupError> {
        let total = self
            .metadata
            .count_entries(filter)
            .await
            .map_err(|e| catalog_error("failed to count entries", e))?;
        let entries = self
            .metadata
            .list_entries(filter, page)
            .await
            .map_err(|e| catalog_error("failed to list entries", e))?;
        Ok(EntryPage { total, entries })
    }

    /// Current storage usage.
    pub async fn stats(&self) -> Result<StorageStats, DedupError> {
        let stats = self
            .metadata
            .aggregate_stats()
            .await
            .map_err(|e| catalog_error("failed to aggregate stats", e))?;
        Ok(StorageStats {
            total_used: stats.total_bytes,
            unique_files: stats.unique_blobs,
            saved_space: stats.saved_bytes,
            logical_bytes: stats.logical_bytes,
        })
    }
}
