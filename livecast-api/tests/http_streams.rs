//! Control-endpoint tests driven through the router with `tower::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use livecast_api::{create_router, ConnectionRegistry};
use livecast_core::config::RtcConfig;
use livecast_core::{MemoryStreamStore, PersistQueue, StreamStateStore};
use livecast_rtc::{SignalingManager, StreamTrackRepository};

fn app() -> Router {
    let store: Arc<dyn StreamStateStore> = Arc::new(MemoryStreamStore::new());
    let persist = PersistQueue::spawn(store.clone(), 64);
    let tracks = Arc::new(StreamTrackRepository::new(persist));
    let signaling = SignalingManager::new(
        tracks.clone(),
        RtcConfig {
            stun_servers: vec![],
            ice_gathering_timeout_secs: 5,
            negotiation_timeout_secs: 10,
        },
    );
    let hub = ConnectionRegistry::new(16);
    create_router(store, tracks, signaling, hub)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// GET carrying a real websocket handshake, so the upgrade extractor is
/// satisfied and the handler's own checks are what respond.
fn ws_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_then_lifecycle() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post("/api/streams", json!({ "title": "first light" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stream = body_json(response).await;
    assert_eq!(stream["status"], "OFFLINE");
    let key = stream["stream_key"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/streams/{key}/start")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "LIVE");

    // Starting again violates the monotonic status order.
    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/streams/{key}/start")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/streams/{key}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "LIVE");
    assert_eq!(body["live_viewers"], 0);

    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/streams/{key}/end")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ENDED");

    // Ended streams never come back.
    let response = app
        .clone()
        .oneshot(post_empty(&format!("/api/streams/{key}/start")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_rejects_empty_title() {
    let response = app()
        .oneshot(post("/api/streams", json!({ "title": "   " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_key_is_404() {
    let app = app();
    for uri in [
        "/api/streams/nope",
        "/api/streams/nope/chat",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
    let response = app
        .clone()
        .oneshot(post_empty("/api/streams/nope/start"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ws_requires_viewer_identity_before_upgrade() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post("/api/streams", json!({ "title": "t" })))
        .await
        .unwrap();
    let stream = body_json(response).await;
    let key = stream["stream_key"].as_str().unwrap().to_string();

    // No viewer param: rejected before any upgrade handshake.
    let response = app
        .clone()
        .oneshot(ws_get(&format!("/api/streams/{key}/ws")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(ws_get(&format!("/api/streams/{key}/ws?viewer=")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Unknown stream key: 404, also before upgrade.
    let response = app
        .clone()
        .oneshot(ws_get("/api/streams/ghost/ws?viewer=v1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
