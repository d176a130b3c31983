//! Blob keys and entry identifiers.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key prefix under which all blobs are stored.
pub const BLOB_PREFIX: &str = "uploads";

/// Longest extension hint kept in a blob key.
const MAX_EXTENSION_LEN: usize = 16;

/// Extract a normalized extension hint from a client-supplied filename.
///
/// Takes the text after the last `.`, lowercased. Returns `None` when the name
/// has no extension or the extension contains anything but ASCII alphanumerics,
/// so a hostile filename can never shape the storage path.
pub fn extension_hint(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Object store key of a blob, derived from its digest and extension hint.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey(String);

impl BlobKey {
    /// Derive the key for a digest: `uploads/{digest}.{ext}` or `uploads/{digest}`.
    pub fn new(digest: &ContentHash, extension: Option<&str>) -> Self {
        match extension {
            Some(ext) if !ext.is_empty() => {
                Self(format!("{BLOB_PREFIX}/{}.{ext}", digest.to_hex()))
            }
            _ => Self(format!("{BLOB_PREFIX}/{}", digest.to_hex())),
        }
    }

    /// Derive the key for a digest using the extension of `filename`.
    pub fn for_filename(digest: &ContentHash, filename: &str) -> Self {
        Self::new(digest, extension_hint(filename).as_deref())
    }

    /// Wrap a key previously produced by [`BlobKey::new`] (e.g. read back from the catalog).
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.0)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog entry identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidEntryId(e.to_string()))
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
