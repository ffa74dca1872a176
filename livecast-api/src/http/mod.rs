// Module: http
// HTTP/JSON surface: stream control endpoints plus the viewer WebSocket

pub mod error;
pub mod streams;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use livecast_core::StreamStateStore;
use livecast_rtc::{SignalingManager, StreamTrackRepository};

use crate::hub::ConnectionRegistry;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StreamStateStore>,
    pub tracks: Arc<StreamTrackRepository>,
    pub signaling: Arc<SignalingManager>,
    pub hub: ConnectionRegistry,
}

/// Create the HTTP router with all routes
pub fn create_router(
    store: Arc<dyn StreamStateStore>,
    tracks: Arc<StreamTrackRepository>,
    signaling: Arc<SignalingManager>,
    hub: ConnectionRegistry,
) -> Router {
    let state = AppState {
        store,
        tracks,
        signaling,
        hub,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(streams::health))
        .route("/api/streams", post(streams::create_stream))
        .route("/api/streams/{key}", get(streams::get_stream))
        .route("/api/streams/{key}/start", post(streams::start_stream))
        .route("/api/streams/{key}/end", post(streams::end_stream))
        .route("/api/streams/{key}/chat", get(streams::chat_history))
        .route("/api/streams/{key}/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
