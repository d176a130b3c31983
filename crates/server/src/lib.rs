//! HTTP API server for the Depot file store.
//!
//! This crate provides:
//! - The deduplicating upload coordinator
//! - File upload, listing, lookup and removal endpoints
//! - Storage usage statistics
//! - Health and Prometheus metrics endpoints

pub mod dedup;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use dedup::{DedupCoordinator, IngestOutcome, RemoveOutcome, StorageStats, UploadRequest};
pub use error::{ApiError, DedupError};
pub use routes::create_router;
pub use state::AppState;
