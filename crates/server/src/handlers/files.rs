//! File upload, listing, lookup and removal endpoints.

use crate::dedup::{IngestOutcome, RemoveOutcome, StorageStats, UploadRequest};
use crate::error::{ApiError, ApiResult, DedupError};
use crate::state::AppState;
use axum::Json;
use axum::extract::multipart::Field;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, OriginalUri, Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use depot_core::EntryId;
use depot_metadata::{EntryFilter, EntryRow, Pagination};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Catalog entry as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub id: String,
    pub original_filename: String,
    pub file_type: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    /// Storage key of the blob.
    pub file: String,
    /// Hex SHA-256 of the content.
    pub checksum: String,
    pub reference_count: u64,
}

impl From<EntryRow> for FileResponse {
    fn from(row: EntryRow) -> Self {
        Self {
            id: row.entry_id().to_string(),
            original_filename: row.original_name,
            file_type: row.content_type,
            size: row.size_bytes.max(0) as u64,
            uploaded_at: row.created_at,
            file: row.object_key,
            checksum: row.digest,
            reference_count: row.reference_count.max(0) as u64,
        }
    }
}

/// Upload response.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    /// "success" for new content, "duplicate" otherwise.
    pub status: String,
    pub message: String,
    pub file: FileResponse,
    pub saved_bytes: u64,
}

/// Paginated listing response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub count: u64,
    /// Link to the following page, or null on the last page.
    pub next: Option<String>,
    /// Link to the preceding page, or null on the first page.
    pub previous: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<FileResponse>,
}

/// Query parameters for file listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListFilesParams {
    /// Case-insensitive substring of the original filename.
    pub filename: Option<String>,
    /// Space or comma separated terms, each of which must appear in the
    /// original filename (case-insensitive).
    pub search: Option<String>,
    /// Exact content type.
    pub file_type: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    /// RFC 3339 timestamp, inclusive.
    pub uploaded_after: Option<String>,
    /// RFC 3339 timestamp, inclusive.
    pub uploaded_before: Option<String>,
    /// 1-based page number (default: 1).
    pub page: Option<u32>,
    /// Entries per page (default and maximum from server config).
    pub page_size: Option<u32>,
}

fn parse_timestamp(field: &str, value: Option<String>) -> ApiResult<Option<OffsetDateTime>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            OffsetDateTime::parse(&v, &Rfc3339).map_err(|e| {
                ApiError::BadRequest(format!("invalid {field} (expected RFC 3339): {e}"))
            })
        })
        .transpose()
}

fn search_terms(search: Option<&str>) -> Vec<String> {
    search
        .unwrap_or_default()
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

/// Link to `page` of the listing at `uri`, keeping its other query parameters.
///
/// The first page carries no `page` parameter.
fn page_link(uri: &Uri, page: u32) -> String {
    let mut pairs: Vec<String> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && pair.split('=').next() != Some("page"))
        .map(str::to_string)
        .collect();
    if page > 1 {
        pairs.push(format!("page={page}"));
    }
    if pairs.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), pairs.join("&"))
    }
}

fn parse_entry_id(id: &str) -> ApiResult<EntryId> {
    EntryId::parse(id).map_err(|_| ApiError::NotFound(format!("file {id} not found")))
}

/// Read the upload field into memory, stopping as soon as it exceeds `limit`.
async fn read_field_bounded(field: &mut Field<'_>, limit: u64) -> ApiResult<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?
    {
        data.extend_from_slice(&chunk);
        if data.len() as u64 > limit {
            crate::metrics::record_rejection("size_limit");
            return Err(DedupError::SizeLimitExceeded {
                size: data.len() as u64,
                limit,
            }
            .into());
        }
    }
    Ok(data)
}

/// POST /api/files/ (and /api/files/upload/) - Upload a file.
///
/// Expects multipart form data with the content in a field named `file`.
/// Returns 201 when the content is new and 200 when it was a duplicate.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let limit = state.dedup.max_upload_size();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = read_field_bounded(&mut field, limit).await?;

        let request = UploadRequest {
            name,
            content_type,
            declared_size: Some(data.len() as u64),
        };
        let mut reader = Cursor::new(data);
        let outcome = state.dedup.ingest(&mut reader, request).await?;

        let (status, body) = match outcome {
            IngestOutcome::Created { entry, saved_bytes } => (
                StatusCode::CREATED,
                UploadResponse {
                    status: "success".to_string(),
                    message: "File uploaded successfully".to_string(),
                    file: entry.into(),
                    saved_bytes,
                },
            ),
            IngestOutcome::Duplicate { entry, saved_bytes } => (
                StatusCode::OK,
                UploadResponse {
                    status: "duplicate".to_string(),
                    message: "Duplicate found".to_string(),
                    file: entry.into(),
                    saved_bytes,
                },
            ),
        };
        return Ok((status, Json(body)).into_response());
    }

    Err(DedupError::NoFileProvided.into())
}

/// GET /api/files/ - List files, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    params: Result<Query<ListFilesParams>, QueryRejection>,
) -> ApiResult<Json<ListFilesResponse>> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let server = &state.config.server;

    let page = params.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::BadRequest("page must be at least 1".to_string()));
    }
    let page_size = params
        .page_size
        .unwrap_or(server.default_page_size)
        .clamp(1, server.max_page_size);

    let filter = EntryFilter {
        name_contains: params.filename.filter(|v| !v.is_empty()),
        name_terms: search_terms(params.search.as_deref()),
        content_type: params.file_type.filter(|v| !v.is_empty()),
        size_min: params.size_min,
        size_max: params.size_max,
        created_after: parse_timestamp("uploaded_after", params.uploaded_after)?,
        created_before: parse_timestamp("uploaded_before", params.uploaded_before)?,
    };

    let listing = state
        .dedup
        .list(&filter, Pagination::page(page, page_size))
        .await?;

    let has_next = u64::from(page) * u64::from(page_size) < listing.total;
    Ok(Json(ListFilesResponse {
        count: listing.total,
        next: has_next.then(|| page_link(&uri, page + 1)),
        previous: (page > 1).then(|| page_link(&uri, page - 1)),
        page,
        page_size,
        results: listing.entries.into_iter().map(FileResponse::from).collect(),
    }))
}

/// GET /api/files/{id}/ - Get one file.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FileResponse>> {
    let id = parse_entry_id(&id)?;
    let entry = state.dedup.get(id).await?;
    Ok(Json(entry.into()))
}

/// DELETE /api/files/{id}/ - Remove one reference to a file.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_entry_id(&id)?;
    match state.dedup.remove(id).await? {
        RemoveOutcome::Deleted(_) | RemoveOutcome::Decremented(_) => Ok(StatusCode::NO_CONTENT),
    }
}

/// GET /api/files/storage_stats/ - Storage usage and deduplication savings.
pub async fn storage_stats(State(state): State<AppState>) -> ApiResult<Json<StorageStats>> {
    Ok(Json(state.dedup.stats().await?))
}
