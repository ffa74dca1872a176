//! Per-connection inbound message dispatch.
//!
//! Frames are JSON envelopes `{"type": ..., "payload": ...}`. The envelope
//! and the payload are parsed in two steps so an unknown type and a malformed
//! payload are told apart in the logs. Neither closes the connection; a bad
//! frame is logged and dropped.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use livecast_core::models::{StreamId, StreamKey, ViewerId};
use livecast_core::StreamStateStore;
use livecast_rtc::SignalingManager;

use crate::hub::ConnectionRegistry;

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatPayload {
    message: String,
}

/// Routes one connection's inbound frames to chat, signaling, or the hub.
pub struct MessageRouter {
    pub viewer_id: ViewerId,
    pub username: String,
    pub stream_id: StreamId,
    pub stream_key: StreamKey,
    store: Arc<dyn StreamStateStore>,
    signaling: Arc<SignalingManager>,
    hub: ConnectionRegistry,
    /// This connection's own outbound queue, for unicast replies.
    outbound: mpsc::Sender<String>,
}

impl MessageRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        viewer_id: ViewerId,
        username: String,
        stream_id: StreamId,
        stream_key: StreamKey,
        store: Arc<dyn StreamStateStore>,
        signaling: Arc<SignalingManager>,
        hub: ConnectionRegistry,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            viewer_id,
            username,
            stream_id,
            stream_key,
            store,
            signaling,
            hub,
            outbound,
        }
    }

    /// Dispatch one raw inbound frame. Never fails the connection.
    pub async fn handle_message(&self, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(viewer_id = %self.viewer_id, error = %e, "malformed frame, dropping");
                return;
            }
        };

        match envelope.kind.as_str() {
            "chat_message" => self.handle_chat(raw, envelope.payload).await,
            "webrtc_offer" => self.handle_offer(envelope.payload).await,
            "webrtc_ice_candidate" => self.handle_ice_candidate(envelope.payload).await,
            other => {
                debug!(viewer_id = %self.viewer_id, kind = other, "unknown message type, dropping");
            }
        }
    }

    /// Persist the chat message, then fan the original frame out verbatim to
    /// everyone on the stream (sender included). Persistence is best-effort:
    /// a store failure is logged and the broadcast still happens.
    async fn handle_chat(&self, raw: &str, payload: serde_json::Value) {
        let chat: ChatPayload = match serde_json::from_value(payload) {
            Ok(chat) => chat,
            Err(e) => {
                warn!(viewer_id = %self.viewer_id, error = %e, "malformed chat payload, dropping");
                return;
            }
        };

        if let Err(e) = self
            .store
            .send_chat_message(&self.stream_id, &self.viewer_id, &self.username, &chat.message)
            .await
        {
            warn!(viewer_id = %self.viewer_id, error = %e, "failed to persist chat message");
        }

        self.hub.broadcast(&self.stream_key, raw.to_string());
    }

    /// Negotiate and unicast the answer back on this connection only.
    async fn handle_offer(&self, payload: serde_json::Value) {
        let offer: RTCSessionDescription = match serde_json::from_value(payload) {
            Ok(offer) => offer,
            Err(e) => {
                warn!(viewer_id = %self.viewer_id, error = %e, "malformed offer payload, dropping");
                return;
            }
        };

        let answer = match self
            .signaling
            .handle_offer(self.viewer_id.clone(), self.stream_key.clone(), offer)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!(
                    viewer_id = %self.viewer_id,
                    stream_key = %self.stream_key,
                    error = %e,
                    "offer rejected"
                );
                return;
            }
        };

        let frame = json!({ "type": "webrtc_answer", "payload": answer }).to_string();
        if self.outbound.try_send(frame).is_err() {
            warn!(viewer_id = %self.viewer_id, "outbound queue unavailable, dropping answer");
        }
    }

    async fn handle_ice_candidate(&self, payload: serde_json::Value) {
        let candidate: RTCIceCandidateInit = match serde_json::from_value(payload) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(viewer_id = %self.viewer_id, error = %e, "malformed ice candidate, dropping");
                return;
            }
        };

        self.signaling
            .handle_ice_candidate(&self.viewer_id, candidate)
            .await;
    }
}
