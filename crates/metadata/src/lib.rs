//! Catalog of stored content for Depot.
//!
//! One entry per distinct content digest, carrying the reference count of
//! logical uploads that share the blob. Two implementations:
//! - [`SqliteStore`] for persistent deployments
//! - [`MemoryStore`] for tests and ephemeral deployments

pub mod error;
pub mod memory;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use memory::MemoryStore;
pub use models::{EntryRow, NewEntry};
pub use repos::{CatalogStats, DecrementOutcome, EntryFilter, EntryRepo, Pagination};
pub use store::{MetadataStore, SqliteStore};

use depot_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            if path.as_os_str().is_empty() {
                return Err(MetadataError::Config(
                    "metadata.path must not be empty".to_string(),
                ));
            }
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Memory => Ok(Arc::new(MemoryStore::new()) as Arc<dyn MetadataStore>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("metadata.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let store = from_config(&MetadataConfig::Memory).await.unwrap();
        store.health_check().await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
