//! HTTP surface of the proxy.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::catalog::FormatVariant;
use crate::error::DownloadError;
use crate::session::{ArtifactStream, DownloadManager, VideoRequest};

#[derive(Clone)]
pub struct AppState {
    pub manager: DownloadManager,
    pub static_root: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(manager: DownloadManager, static_root: Option<PathBuf>) -> Self {
        Self {
            manager,
            static_root: static_root.map(Arc::new),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        Self {
            status: err.status(),
            message: err.client_message().to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct QualitiesRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
    /// Accepted as a string or a bare number.
    #[serde(default)]
    pub itag: Option<Value>,
}

impl DownloadRequest {
    fn format_id(&self) -> Option<String> {
        match self.itag.as_ref()? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QualitiesResponse {
    pub qualities: Vec<FormatVariant>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/get_qualities", post(get_qualities))
        .route("/api/download", post(download))
        .fallback(static_fallback)
        .with_state(state)
}

pub async fn get_qualities(
    State(state): State<AppState>,
    payload: Result<Json<QualitiesRequest>, JsonRejection>,
) -> ApiResult<Json<QualitiesResponse>> {
    let Json(payload) = payload.map_err(reject_body)?;
    let request = VideoRequest::new(payload.url.unwrap_or_default(), None);
    let catalog = state.manager.list_formats(&request).await?;
    Ok(Json(QualitiesResponse {
        qualities: catalog.into_variants(),
    }))
}

pub async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload.map_err(reject_body)?;
    let format_id = payload.format_id();
    let request = VideoRequest::new(payload.url.unwrap_or_default(), format_id.as_deref());
    let stream = state.manager.download(&request).await?;
    Ok(attachment_response(stream))
}

fn reject_body(rejection: JsonRejection) -> ApiError {
    debug!(error = %rejection, "rejected request body");
    DownloadError::InvalidUrl.into()
}

/// Wraps a ready artifact stream as a file download.
fn attachment_response(stream: ArtifactStream) -> Response {
    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(stream.mime_type())
        .unwrap_or_else(|_| HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_TYPE, content_type);

    let disposition = format!("attachment; filename=\"{}\"", stream.suggested_filename());
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"youtube_video.mp4\""));
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    if let Some(len) = stream.size_hint() {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

async fn static_fallback(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    let Some(root) = state.static_root.as_deref() else {
        return ApiError::not_found("file not found").into_response();
    };
    match serve_static(root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_static(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_static_path(root, request_path)?;
    let target = match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => target.join("index.html"),
        Ok(_) => target,
        Err(_) => return Err(ApiError::not_found("file not found")),
    };
    let file = File::open(&target)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&target).first() {
        if let Ok(value) = mime.to_string().parse() {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    Ok(response)
}

fn resolve_static_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::bad_request("invalid path"));
    }
    Ok(root.join(candidate))
}
