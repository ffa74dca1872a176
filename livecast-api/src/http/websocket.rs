//! Viewer WebSocket endpoint.
//!
//! `GET /api/streams/{key}/ws?viewer={id}&name={username}`. Identity is
//! checked before the upgrade so a rejected client costs nothing: no
//! registration, no tasks. After the upgrade each connection runs two tasks,
//! a writer draining the hub queue into the socket and a reader feeding the
//! `MessageRouter` in frame-arrival order.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use livecast_core::models::{generate_id, Livestream, StreamKey, ViewerId};

use super::{AppError, AppResult, AppState};
use crate::router::MessageRouter;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub viewer: Option<String>,
    pub name: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let viewer = query
        .viewer
        .filter(|v| !v.is_empty())
        .ok_or_else(|| livecast_core::Error::Unauthorized("viewer identity required".to_string()))?;

    let key = StreamKey::from(key);
    let stream = state
        .store
        .get_stream_by_key(&key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("stream {key}")))?;

    let viewer_id = ViewerId::from(viewer);
    let username = query.name.unwrap_or_else(|| viewer_id.as_str().to_string());

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, stream, key, viewer_id, username)))
}

async fn handle_socket(
    state: AppState,
    socket: WebSocket,
    stream: Livestream,
    stream_key: StreamKey,
    viewer_id: ViewerId,
    username: String,
) {
    let connection_id = format!("{viewer_id}-{}", generate_id());
    let (outbound, mut queue) =
        state
            .hub
            .register(connection_id.clone(), viewer_id.clone(), stream_key.clone());

    let router = MessageRouter::new(
        viewer_id.clone(),
        username,
        stream.id,
        stream_key,
        state.store.clone(),
        state.signaling.clone(),
        state.hub.clone(),
        outbound,
    );

    info!(connection_id = %connection_id, viewer_id = %viewer_id, "websocket connected");

    let (mut sink, mut source) = socket.split();

    // Writer: hub queue -> socket. Ends when the queue closes (eviction) or
    // the socket errors out.
    let mut write_task = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if sink.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: socket -> router, one frame at a time.
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(message)) = source.next().await {
            match message {
                Message::Text(text) => router.handle_message(text.as_str()).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first, the other is torn down with it.
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.hub.unregister(&connection_id);
    state.signaling.close_peer_connection(&viewer_id).await;
    debug!(connection_id = %connection_id, viewer_id = %viewer_id, "websocket disconnected");
}
