//! Server test utilities.

use crate::common::fixtures::multipart_body;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use depot_core::config::{AppConfig, MetadataConfig, StorageConfig};
use depot_metadata::{MemoryStore, MetadataStore, SqliteStore};
use depot_server::{AppState, create_router};
use depot_storage::{FilesystemBackend, MemoryBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: Option<TempDir>,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server backed by a temporary directory and SQLite database.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a filesystem/SQLite test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            server: Default::default(),
            storage: StorageConfig::Filesystem { path: storage_path },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
        };
        modifier(&mut config);

        Self::from_parts(config, storage, metadata, Some(temp_dir))
    }

    /// Create a test server with memory storage and catalog.
    pub async fn in_memory() -> Self {
        Self::with_storage(Arc::new(MemoryBackend::new())).await
    }

    /// Create a test server over the given object store and an in-memory catalog.
    pub async fn with_storage(storage: Arc<dyn ObjectStore>) -> Self {
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        Self::from_parts(AppConfig::for_testing(), storage, metadata, None)
    }

    fn from_parts(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());
        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Get access to the underlying object store.
    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    /// Send a request and decode the body as JSON (`Null` when empty or not JSON).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Send a request and return the raw body as text.
    pub async fn send_text(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Issue a bodiless request.
    pub async fn request(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Upload `data` as the `file` field to `POST /api/files/`.
    pub async fn upload(&self, filename: &str, content_type: &str, data: &[u8]) -> (StatusCode, Value) {
        self.upload_to("/api/files/", filename, content_type, data)
            .await
    }

    /// Upload `data` as the `file` field to the given path.
    pub async fn upload_to(
        &self,
        uri: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let (header, body) = multipart_body("file", filename, content_type, data);
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", header)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }
}
