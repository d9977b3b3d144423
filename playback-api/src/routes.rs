use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use stream_engine::{EngineError, SourceId, StreamEngine};

use crate::error::ApiError;

/// Create the playback router with all endpoints.
pub fn stream_router(engine: Arc<StreamEngine>) -> Router {
    Router::new()
        .route("/streams/{id}", get(resolve_handler))
        .route("/streams/{id}/stream.m3u8", get(manifest_handler))
        .route("/streams/{id}/segment/{segment}", get(segment_handler))
        .route("/health", get(health_all_handler))
        .route("/health/{id}", get(health_handler))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    /// Per-request activation deadline; defaults and caps come from config
    timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    stream_url: String,
}

/// Resolve a source id to a manifest URL, activating its worker if
/// needed. Blocks (this request only) until the stream is playable or
/// the deadline elapses.
async fn resolve_handler(
    Path(id): Path<String>,
    Query(query): Query<ResolveQuery>,
    State(engine): State<Arc<StreamEngine>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SourceId::new(id)?;

    let config = engine.config();
    let deadline = query
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.resolve_timeout())
        .min(config.resolve_timeout_cap());

    let manifest = engine.resolve(&id, deadline).await?;

    Ok(Json(ResolveResponse {
        stream_url: format!("/streams/{}/stream.m3u8", manifest.source_id),
    }))
}

/// Serve the live HLS playlist for a source.
///
/// Counts as playback activity, which keeps the worker from being
/// evicted as idle while a player is polling the playlist.
async fn manifest_handler(
    Path(id): Path<String>,
    State(engine): State<Arc<StreamEngine>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SourceId::new(id)?;
    engine.record_activity(&id).await;

    let playlist = match tokio::fs::read_to_string(engine.manifest_path(&id)).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((
                StatusCode::NOT_FOUND,
                format!("No manifest for {}; resolve the stream first", id),
            )
                .into_response());
        }
        Err(e) => return Err(EngineError::Io(e).into()),
    };

    Ok((
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        playlist,
    )
        .into_response())
}

/// Serve one media segment.
async fn segment_handler(
    Path((id, segment)): Path<(String, String)>,
    State(engine): State<Arc<StreamEngine>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SourceId::new(id)?;

    let Some(path) = engine.segment_path(&id, &segment) else {
        return Ok((StatusCode::NOT_FOUND, "No such segment".to_string()).into_response());
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((StatusCode::NOT_FOUND, "No such segment".to_string()).into_response());
        }
        Err(e) => return Err(EngineError::Io(e).into()),
    };

    let stream = ReaderStream::new(file);
    Ok((
        [(header::CONTENT_TYPE, "video/mp2t")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Read-only per-source health for external dashboards. Never triggers
/// activation.
async fn health_all_handler(State(engine): State<Arc<StreamEngine>>) -> impl IntoResponse {
    Json(engine.health_all())
}

async fn health_handler(
    Path(id): Path<String>,
    State(engine): State<Arc<StreamEngine>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SourceId::new(id)?;
    match engine.health_of(&id) {
        Some(snapshot) => Ok(Json(snapshot).into_response()),
        None => Err(EngineError::SourceUnknown(id).into()),
    }
}
