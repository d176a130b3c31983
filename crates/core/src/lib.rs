//! Core domain types for the Depot content-addressable file store.
//!
//! This crate defines the pieces shared by every other crate:
//! - Content digests and the streaming hasher
//! - Blob key derivation and entry identifiers
//! - Configuration

pub mod blob;
pub mod config;
pub mod error;
pub mod hash;

pub use blob::{BlobKey, EntryId, extension_hint};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher, hash_reader};

/// Default upload size cap: 10 MiB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// Default read size used while hashing and copying uploads: 8 KiB
pub const DEFAULT_HASH_CHUNK_SIZE: usize = 8192;
