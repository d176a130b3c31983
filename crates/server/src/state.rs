//! Application state shared across handlers.

use crate::dedup::DedupCoordinator;
use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::{BlobStore, ObjectStore};
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload coordinator over `storage` and `metadata`.
    pub dedup: Arc<DedupCoordinator>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let dedup = DedupCoordinator::new(
            metadata.clone(),
            BlobStore::new(storage.clone()),
            config.server.max_upload_size,
            config.server.hash_chunk_size,
        );
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            dedup: Arc::new(dedup),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_metadata::SqliteStore;
    use depot_storage::backends::filesystem::FilesystemBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn state_carries_configured_limit() {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path()).await.unwrap());
        let db_path = temp.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(&db_path, None).await.unwrap());

        let mut config = AppConfig::for_testing();
        config.server.max_upload_size = 1234;

        let state = AppState::new(config, storage, metadata);
        assert_eq!(state.dedup.max_upload_size(), 1234);
        assert_eq!(state.storage.backend_name(), "filesystem");
        assert_eq!(state.metadata.backend_name(), "sqlite");
    }
}
