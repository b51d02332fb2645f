//! ---
//! gr_section: "03-networking"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "HTTP routes for the storage volume, status and metrics."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use gr_common::storage::StorageError;
use serde::{Deserialize, Serialize};
use futures_util::stream::{self, Stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::control::StatusSnapshot;
use crate::server::ServerState;

const DOWNLOAD_CHUNK_BYTES: usize = 16 * 1024;

pub(crate) const UPLOAD_COMPLETE: &str = "Upload complete. File saved to storage.";

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "File not found"),
            StorageError::InvalidName(name) => {
                ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid file name '{name}'"))
            }
            other => {
                error!(error = %other, "storage operation failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

pub(crate) async fn get_index(State(state): State<Arc<ServerState>>) -> Result<Html<String>, ApiError> {
    let path = state.storage.index_path();
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Ok(Html(body)),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "index document unavailable");
            Err(ApiError::new(StatusCode::NOT_FOUND, "File not found"))
        }
    }
}

pub(crate) async fn post_upload(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<&'static str, ApiError> {
    let mut saved = 0usize;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?
    {
        let Some(name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let (path, file) = state.storage.create(&name)?;
        let mut file = tokio::fs::File::from_std(file);
        let mut written = 0usize;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?
        {
            file.write_all(&chunk).await.map_err(|err| {
                error!(path = %path.display(), error = %err, "upload write failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Unable to write file")
            })?;
            written += chunk.len();
        }
        file.flush()
            .await
            .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
        info!(path = %path.display(), bytes = written, "upload stored");
        saved += 1;
    }

    if saved == 0 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No file uploaded"));
    }
    Ok(UPLOAD_COMPLETE)
}

#[derive(Debug, Deserialize)]
pub(crate) struct DownloadParams {
    file: Option<String>,
}

pub(crate) async fn get_download(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let Some(name) = params.file.filter(|name| !name.trim().is_empty()) else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "File parameter required"));
    };
    let (path, file) = state.storage.open_file(&name)?;
    let body = Body::from_stream(file_chunks(tokio::fs::File::from_std(file)));

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Read `file` in fixed-size chunks until end of file.
fn file_chunks(file: tokio::fs::File) -> impl Stream<Item = std::io::Result<Vec<u8>>> {
    stream::try_unfold(file, |mut file| async move {
        let mut chunk = vec![0u8; DOWNLOAD_CHUNK_BYTES];
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            return Ok(None);
        }
        chunk.truncate(read);
        Ok(Some((chunk, file)))
    })
}

pub(crate) async fn get_status(State(state): State<Arc<ServerState>>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

pub(crate) async fn get_metrics(State(state): State<Arc<ServerState>>) -> Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}
