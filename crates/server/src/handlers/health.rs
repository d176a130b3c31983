//! Liveness and readiness.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: String,
    pub metadata: String,
}

/// GET /api/health - Health check.
///
/// Unauthenticated and free of file data, suitable for load balancer health checks.
/// Returns 503 when either backend is unreachable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.storage.health_check().await.map_err(|e| {
        tracing::warn!(backend = state.storage.backend_name(), error = %e, "storage health check failed");
        ApiError::Unavailable("storage backend unavailable".to_string())
    })?;
    state.metadata.health_check().await.map_err(|e| {
        tracing::warn!(backend = state.metadata.backend_name(), error = %e, "metadata health check failed");
        ApiError::Unavailable("metadata backend unavailable".to_string())
    })?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.storage.backend_name().to_string(),
        metadata: state.metadata.backend_name().to_string(),
    }))
}
