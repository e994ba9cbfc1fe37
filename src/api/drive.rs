//! Office-wide Drive endpoints.
//!
//! Drive uses one application token, so every user sees the same files.

use super::{AppError, AppState};
use crate::credentials::Integration;
use crate::google::{ApiOperation, DriveAbout, DriveFile};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const DEFAULT_PAGE_SIZE: u32 = 100;
const PAGE_SIZE_LIMIT: u32 = 1000;

/// Query parameters for GET /api/drive/files
#[derive(Deserialize, Default)]
pub struct ListFilesQuery {
    /// Folder to list; the configured root when absent
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// Query parameters for POST /api/drive/files
#[derive(Deserialize)]
pub struct UploadQuery {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

/// Request body for POST /api/drive/folders
#[derive(Deserialize)]
pub struct FolderRequest {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

/// List files response
#[derive(Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<DriveFile>,
}

/// Create drive API router
pub fn create_drive_router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route(
            "/api/drive/files",
            get(list_files).post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/drive/files/:id/content", get(download_file))
        .route("/api/drive/folders", post(create_folder))
        .route("/api/drive/about", get(about))
        .with_state(Arc::new(state))
}

/// GET /api/drive/files - Children of a folder
async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListFilesQuery>,
    headers: HeaderMap,
) -> Result<Json<ListFilesResponse>, AppError> {
    let user = state.caller(&headers)?;
    let (principal, token) = state.authorize(&user, ApiOperation::ListFiles).await?;
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, PAGE_SIZE_LIMIT);

    let drive = state.google.drive(&token);
    let files = match query.parent.as_deref().filter(|p| !p.is_empty()) {
        Some(parent) => drive.list_files(parent, page_size).await,
        None => drive.list_root(page_size).await,
    }
    .map_err(|e| state.api_failure(&principal, Integration::Drive, e))?;

    Ok(Json(ListFilesResponse { files }))
}

/// POST /api/drive/folders - Find or create a folder
async fn create_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<FolderRequest>,
) -> Result<Json<DriveFile>, AppError> {
    let user = state.caller(&headers)?;
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("Folder name is required".to_string()));
    }
    let (principal, token) = state.authorize(&user, ApiOperation::CreateFolder).await?;

    let folder = state
        .google
        .drive(&token)
        .ensure_folder(request.name.trim(), request.parent.as_deref())
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Drive, e))?;

    info!(user = %user, folder = %folder.id, "Drive folder ready");
    Ok(Json(folder))
}

/// POST /api/drive/files?name=&parent= - Upload the request body as a file
async fn upload_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<DriveFile>), AppError> {
    let user = state.caller(&headers)?;
    if query.name.trim().is_empty() {
        return Err(AppError::BadRequest("File name is required".to_string()));
    }
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let (principal, token) = state.authorize(&user, ApiOperation::UploadFile).await?;

    let file = state
        .google
        .drive(&token)
        .upload_file(query.name.trim(), query.parent.as_deref(), &mime_type, body.to_vec())
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Drive, e))?;

    info!(user = %user, file = %file.id, bytes = body.len(), "Drive file uploaded");
    Ok((StatusCode::CREATED, Json(file)))
}

/// GET /api/drive/files/:id/content - Stream a file back to the caller
async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user = state.caller(&headers)?;
    let (principal, token) = state.authorize(&user, ApiOperation::DownloadFile).await?;

    let drive = state.google.drive(&token);
    let metadata = drive
        .get_file(&file_id)
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Drive, e))?;
    let content = drive
        .download_file(&file_id)
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Drive, e))?;

    let content_type = metadata
        .mime_type
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&metadata.name)
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}

/// GET /api/drive/about - Connected Drive account
async fn about(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DriveAbout>, AppError> {
    let user = state.caller(&headers)?;
    let (principal, token) = state.authorize(&user, ApiOperation::About).await?;

    let about = state
        .google
        .drive(&token)
        .about()
        .await
        .map_err(|e| state.api_failure(&principal, Integration::Drive, e))?;

    Ok(Json(about))
}
