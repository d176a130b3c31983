//! Database models mapping to the metadata schema.

use depot_core::{BlobKey, EntryId};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Catalog entry: one row per distinct content digest.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EntryRow {
    pub id: Uuid,
    /// Lowercase hex SHA-256 of the content. Unique.
    pub digest: String,
    pub object_key: String,
    /// Name supplied with the first upload of this content.
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
    /// Number of logical uploads sharing this blob. Always at least 1.
    pub reference_count: i64,
}

impl EntryRow {
    pub fn entry_id(&self) -> EntryId {
        EntryId::from_uuid(self.id)
    }

    pub fn blob_key(&self) -> BlobKey {
        BlobKey::from_stored(self.object_key.clone())
    }
}

/// Values for an entry about to be created.
///
/// The caller assigns `id` and `created_at`; they only take effect when the
/// digest is not yet catalogued.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub id: Uuid,
    pub digest: String,
    pub object_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
}

impl NewEntry {
    /// The row this entry becomes when it is first inserted.
    pub fn into_row(self) -> EntryRow {
        EntryRow {
            id: self.id,
            digest: self.digest,
            object_key: self.object_key,
            original_name: self.original_name,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            reference_count: 1,
        }
    }
}
