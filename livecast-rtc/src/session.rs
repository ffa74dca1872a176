use std::sync::Arc;

use chrono::{DateTime, Utc};
use webrtc::peer_connection::RTCPeerConnection;

use livecast_core::models::{StreamKey, ViewerId};

/// One viewer's negotiated peer connection.
///
/// Created only after a successful offer/answer exchange; a failed
/// negotiation leaves nothing behind. `session_id` distinguishes a session
/// from its replacement when a viewer renegotiates: the old connection's
/// state callbacks must not tear down the new session.
pub struct PeerSession {
    pub session_id: String,
    pub viewer_id: ViewerId,
    pub stream_key: StreamKey,
    pub pc: Arc<RTCPeerConnection>,
    pub created_at: DateTime<Utc>,
}

impl PeerSession {
    pub fn new(
        session_id: String,
        viewer_id: ViewerId,
        stream_key: StreamKey,
        pc: Arc<RTCPeerConnection>,
    ) -> Self {
        Self {
            session_id,
            viewer_id,
            stream_key,
            pc,
            created_at: Utc::now(),
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!(viewer_id = %self.viewer_id, error = %e, "error closing peer connection");
        }
    }
}
