//! Coordinator and API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

const MIB: u64 = 1024 * 1024;

/// Human-readable form of a size limit: "10MB" for whole mebibytes, bytes otherwise.
fn describe_limit(limit: &u64) -> String {
    let limit = *limit;
    if limit >= MIB && limit % MIB == 0 {
        format!("{}MB", limit / MIB)
    } else {
        format!("{limit} byte")
    }
}

/// Failure of a coordinator operation.
///
/// Every error raised below the coordinator (hashing, catalog, blob storage)
/// is folded into one of these kinds before it leaves `ingest` or `remove`.
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("No file provided")]
    NoFileProvided,

    #[error("File size exceeds {} limit ({size} bytes, limit {limit} bytes)", describe_limit(.limit))]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DedupError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoFileProvided => "no_file_provided",
            Self::SizeLimitExceeded { .. } => "size_limit_exceeded",
            Self::StorageWriteFailed(_) => "storage_write_failed",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoFileProvided => StatusCode::BAD_REQUEST,
            Self::SizeLimitExceeded { .. } => StatusCode::BAD_REQUEST,
            Self::StorageWriteFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always "error".
    pub status: &'static str,
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Dedup(#[from] DedupError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unavailable(_) => "unavailable",
            Self::Dedup(e) => e.code(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Dedup(e) => e.status_code(),
        }
    }

    /// Message sent to the client.
    ///
    /// Server-side failures get a fixed message; their detail is only logged.
    pub fn client_message(&self) -> String {
        match self {
            Self::Dedup(DedupError::Internal(_)) => "Server error".to_string(),
            Self::Dedup(DedupError::StorageWriteFailed(_)) => "Failed to store file".to_string(),
            Self::Unavailable(_) => "Service unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            status: "error",
            code: self.code().to_string(),
            message: self.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
