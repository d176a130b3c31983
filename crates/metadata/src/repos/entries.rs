//! Catalog entry repository.

use crate::error::MetadataResult;
use crate::models::{EntryRow, NewEntry};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for catalog entries.
///
/// `create_or_increment` and `decrement_or_delete` are the only operations that
/// change reference counts. Each is atomic per digest, so concurrent callers
/// never lose an increment and never observe a count below one.
#[async_trait]
pub trait EntryRepo: Send + Sync {
    /// Look up the entry for a digest.
    async fn find_by_digest(&self, digest: &str) -> MetadataResult<Option<EntryRow>>;

    /// Look up an entry by id.
    async fn get_entry(&self, id: Uuid) -> MetadataResult<Option<EntryRow>>;

    /// Insert `entry` with a reference count of 1, or increment the count of the
    /// entry already holding its digest.
    ///
    /// Returns the resulting row and whether this call created it. A duplicate
    /// never overwrites the stored name, type, size or timestamp.
    async fn create_or_increment(&self, entry: &NewEntry) -> MetadataResult<(EntryRow, bool)>;

    /// Drop one reference to the entry `id` holding `digest`, deleting the
    /// entry when it was the last.
    ///
    /// If the digest has since been catalogued again under another id, that
    /// entry is left alone and the result is `NotFound`.
    async fn decrement_or_delete(
        &self,
        digest: &str,
        id: Uuid,
    ) -> MetadataResult<DecrementOutcome>;

    /// Delete an entry regardless of its reference count.
    ///
    /// Only used to undo a creation whose blob write failed.
    async fn delete_entry(&self, id: Uuid) -> MetadataResult<Option<EntryRow>>;

    /// List entries matching `filter`, newest first.
    async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: Pagination,
    ) -> MetadataResult<Vec<EntryRow>>;

    /// Count entries matching `filter`.
    async fn count_entries(&self, filter: &EntryFilter) -> MetadataResult<u64>;

    /// Aggregate storage statistics over all entries.
    async fn aggregate_stats(&self) -> MetadataResult<CatalogStats>;
}

/// Result of [`EntryRepo::decrement_or_delete`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecrementOutcome {
    /// The last reference was dropped; the row as it was before deletion.
    Deleted(EntryRow),
    /// Other references remain; the row after the decrement.
    Decremented(EntryRow),
    /// No entry with this id holds this digest.
    NotFound,
}

/// Entry listing filter. All set conditions must hold.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Case-insensitive (ASCII) substring of the original name.
    pub name_contains: Option<String>,
    /// Further substrings that must all appear in the original name.
    pub name_terms: Vec<String>,
    /// Exact content type.
    pub content_type: Option<String>,
    /// Inclusive lower bound on size.
    pub size_min: Option<u64>,
    /// Inclusive upper bound on size.
    pub size_max: Option<u64>,
    /// Inclusive lower bound on creation time.
    pub created_after: Option<OffsetDateTime>,
    /// Inclusive upper bound on creation time.
    pub created_before: Option<OffsetDateTime>,
}

impl EntryFilter {
    /// Evaluate the filter against a row in memory.
    pub fn matches(&self, row: &EntryRow) -> bool {
        let name = row.original_name.to_ascii_lowercase();
        if !self
            .name_needles()
            .all(|needle| name.contains(&needle.to_ascii_lowercase()))
        {
            return false;
        }
        if let Some(content_type) = &self.content_type
            && row.content_type != *content_type
        {
            return false;
        }
        let size = row.size_bytes.max(0) as u64;
        if self.size_min.is_some_and(|min| size < min) {
            return false;
        }
        if self.size_max.is_some_and(|max| size > max) {
            return false;
        }
        if self.created_after.is_some_and(|after| row.created_at < after) {
            return false;
        }
        if self.created_before.is_some_and(|before| row.created_at > before) {
            return false;
        }
        true
    }
}

impl EntryFilter {
    /// Every substring the original name must contain.
    pub fn name_needles(&self) -> impl Iterator<Item = &str> {
        self.name_contains
            .iter()
            .chain(self.name_terms.iter())
            .map(String::as_str)
    }
}

/// Offset/limit window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    /// Window for a 1-based page number.
    pub fn page(page: u32, page_size: u32) -> Self {
        let page = u64::from(page.max(1));
        let limit = u64::from(page_size);
        Self {
            offset: (page - 1) * limit,
            limit,
        }
    }
}

/// Catalog-wide storage statistics.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CatalogStats {
    /// Bytes physically stored: sum of blob sizes.
    pub total_bytes: u64,
    /// Bytes clients uploaded: sum of size times reference count.
    pub logical_bytes: u64,
    /// Number of distinct blobs.
    pub unique_blobs: u64,
    /// Sum over entries of `size - size / reference_count`.
    pub saved_bytes: f64,
}

impl CatalogStats {
    /// Fold a single entry into the totals.
    pub fn add(&mut self, row: &EntryRow) {
        let size = row.size_bytes.max(0) as u64;
        let refs = row.reference_count.max(1);
        self.total_bytes += size;
        self.logical_bytes += size * refs as u64;
        self.unique_blobs += 1;
        self.saved_bytes += size as f64 - size as f64 / refs as f64;
    }
}
