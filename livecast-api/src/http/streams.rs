//! Stream control endpoints: the operator surface for the stream lifecycle.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use livecast_core::models::{ChatMessage, Livestream, StreamKey, StreamStatus};
use livecast_rtc::Error as RtcError;

use super::{AppError, AppResult, AppState};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    pub title: String,
}

/// `POST /api/streams` — create a stream record with a fresh stream key.
pub async fn create_stream(
    State(state): State<AppState>,
    Json(req): Json<CreateStreamRequest>,
) -> AppResult<Json<Livestream>> {
    if req.title.trim().is_empty() {
        return Err(livecast_core::Error::InvalidInput("title must not be empty".to_string()).into());
    }

    let stream = state.store.create_stream(req.title.trim()).await?;
    info!(stream_id = %stream.id, "stream created");
    Ok(Json(stream))
}

#[derive(Debug, Serialize)]
pub struct StreamResponse {
    #[serde(flatten)]
    pub stream: Livestream,
    /// Current in-memory viewer count; zero when not live.
    pub live_viewers: i64,
}

/// `GET /api/streams/{key}` — the stream record plus its live viewer count.
pub async fn get_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<StreamResponse>> {
    let key = StreamKey::from(key);
    let stream = state
        .store
        .get_stream_by_key(&key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {key}")))?;

    let live_viewers = state.tracks.viewer_count(&key);
    Ok(Json(StreamResponse {
        stream,
        live_viewers,
    }))
}

/// `POST /api/streams/{key}/start` — mark the stream LIVE and publish its
/// media tracks.
pub async fn start_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<Livestream>> {
    let key = StreamKey::from(key);
    let stream = state
        .store
        .get_stream_by_key(&key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {key}")))?;

    // Status first: a non-monotonic transition (already live, already ended)
    // is rejected before any track state is touched.
    state
        .store
        .set_stream_status(&stream.id, StreamStatus::Live)
        .await?;

    state
        .tracks
        .handle_stream_start(key.clone(), stream.id.clone())
        .map_err(|e| match e {
            RtcError::StreamAlreadyActive(k) => {
                AppError::conflict(format!("stream {k} is already live"))
            }
            other => AppError::internal(other.to_string()),
        })?;

    info!(stream_id = %stream.id, stream_key = %key, "stream started");
    let stream = state
        .store
        .get_stream(&stream.id)
        .await?
        .ok_or_else(|| AppError::internal("stream vanished during start"))?;
    Ok(Json(stream))
}

/// `POST /api/streams/{key}/end` — mark the stream ENDED and tear down its
/// tracks; attached viewer sessions are closed by the lifecycle listener.
pub async fn end_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<Livestream>> {
    let key = StreamKey::from(key);
    let stream = state
        .store
        .get_stream_by_key(&key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {key}")))?;

    state
        .store
        .set_stream_status(&stream.id, StreamStatus::Ended)
        .await?;
    state.tracks.handle_stream_end(&key);

    info!(stream_id = %stream.id, stream_key = %key, "stream ended");
    let stream = state
        .store
        .get_stream(&stream.id)
        .await?
        .ok_or_else(|| AppError::internal("stream vanished during end"))?;
    Ok(Json(stream))
}

#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    #[serde(default = "default_chat_limit")]
    pub limit: usize,
}

fn default_chat_limit() -> usize {
    50
}

/// `GET /api/streams/{key}/chat` — most recent messages, oldest first.
pub async fn chat_history(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<ChatHistoryQuery>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let key = StreamKey::from(key);
    let stream = state
        .store
        .get_stream_by_key(&key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {key}")))?;

    let messages = state.store.chat_history(&stream.id, query.limit).await?;
    Ok(Json(messages))
}
