//! Blob storage for Depot.
//!
//! This crate provides:
//! - An object store abstraction with atomic and streaming writes
//! - A digest-addressed [`BlobStore`] on top of it
//! - Backends: local filesystem and in-process memory

pub mod backends;
pub mod blobs;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use blobs::BlobStore;
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectStore, StreamingUpload};

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            if path.as_os_str().is_empty() {
                return Err(StorageError::Config(
                    "storage.path must not be empty".to_string(),
                ));
            }
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}
