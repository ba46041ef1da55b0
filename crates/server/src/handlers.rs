//! Registry read-path handlers.

use crate::error::{ApiError, ApiResult};
use crate::rewrite::rewrite_tarball_urls;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use pantry_core::document::resolve_version;
use pantry_core::path::{is_within, local_path};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Chunk size for streaming tarball responses (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Index response: mirror totals and the consumed change sequence.
#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub packages: u64,
    pub available: u64,
    pub sequence: i64,
}

/// GET / - mirror status summary.
pub async fn index(State(state): State<AppState>) -> ApiResult<Json<IndexResponse>> {
    let stats = state.catalog.stats().await?;
    let sequence = state.catalog.get_sequence().await?;
    Ok(Json(IndexResponse {
        packages: stats.packages,
        available: stats.completed,
        sequence,
    }))
}

/// GET /{name} - full package document with rewritten tarball URLs.
pub async fn document(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_document(&state, &name, &headers).await
}

/// GET /{name}/{version} - versioned sub-document.
///
/// A scoped package requested with an unencoded slash lands here with
/// the scope in `name`; in that case the two segments are the package
/// name and the full document is served.
pub async fn document_version(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if name.starts_with('@') && !name.contains('/') {
        let scoped = format!("{name}/{version}");
        return serve_document(&state, &scoped, &headers).await;
    }

    let stored = state.catalog.get_document(&name, false).await?;
    let rewritten = rewrite_tarball_urls(
        &stored.document,
        &state.config.server.scheme,
        &state.config.server.host,
    );
    match resolve_version(&rewritten, &version) {
        Some(resolved) => Ok(Json(resolved).into_response()),
        None => Err(ApiError::NotFound(format!("{name}@{version}"))),
    }
}

/// GET /{name}/{version}/{tarball} - tarball download.
pub async fn tarball(
    State(state): State<AppState>,
    Path((name, version, tarball)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    serve_tarball(&state, &name, &version, &tarball).await
}

/// GET /{name}/{version}/{tarball}/{extra} - scoped-name tarball.
///
/// `/@scope/pkg/-/pkg-1.0.0.tgz` parses as four segments; remap them
/// to `(name = @scope/pkg, version = -, tarball = pkg-1.0.0.tgz)`.
pub async fn scoped_tarball(
    State(state): State<AppState>,
    Path((name, version, tarball, extra)): Path<(String, String, String, String)>,
) -> ApiResult<Response> {
    let scoped = format!("{name}/{version}");
    serve_tarball(&state, &scoped, &tarball, &extra).await
}

/// Fallback: unknown routes answer an empty JSON object, the shape
/// package clients expect from a registry 404.
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({}))).into_response()
}

async fn serve_document(state: &AppState, name: &str, headers: &HeaderMap) -> ApiResult<Response> {
    let stored = state.catalog.get_document(name, false).await?;
    let revision = state.catalog.get_revision(name).await?.unwrap_or_default();
    let etag = format!("\"{revision}\"");

    if let Some(candidate) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok())
        && candidate == etag
    {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(ETAG, &etag)
            .body(Body::empty())
            .map_err(|e| ApiError::Internal(e.to_string()));
    }

    let body = rewrite_tarball_urls(
        &stored.document,
        &state.config.server.scheme,
        &state.config.server.host,
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(ETAG, &etag)
        .body(Body::from(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn serve_tarball(
    state: &AppState,
    name: &str,
    version: &str,
    filename: &str,
) -> ApiResult<Response> {
    if version != "-" {
        return Err(ApiError::NotFound(format!("{name}/{version}/{filename}")));
    }
    // Traversal guard, before and after mapping.
    if name.contains("..") || filename.contains("..") {
        return Err(ApiError::NotFound(filename.to_string()));
    }

    let base = &state.config.mirror.path;
    let url_path = format!("{name}/-/{filename}");
    let local = local_path(base, &url_path);
    if !is_within(base, &local) {
        return Err(ApiError::NotFound(filename.to_string()));
    }

    if state.config.server.redirect {
        let relative = local
            .strip_prefix(base)
            .map_err(|_| ApiError::NotFound(filename.to_string()))?;
        let location = format!(
            "{}/{}",
            state.config.server.redirect_path.trim_end_matches('/'),
            relative.display()
        );
        return Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(
                CONTENT_DISPOSITION,
                format!(r#"attachment; filename="{filename}""#),
            )
            .header("x-accel-redirect", location)
            .body(Body::empty())
            .map_err(|e| ApiError::Internal(e.to_string()));
    }

    let mut file = match fs::File::open(&local).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(filename.to_string()));
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .len();

    let stream: futures::stream::BoxStream<'static, std::io::Result<Bytes>> =
        Box::pin(async_stream::try_stream! {
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        });
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, size)
        .header(
            CONTENT_DISPOSITION,
            format!(r#"attachment; filename="{filename}""#),
        )
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}
