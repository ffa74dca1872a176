//! WebRTC signaling: offer/answer negotiation and per-viewer session state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_local::TrackLocal;

use livecast_core::config::RtcConfig;
use livecast_core::models::{generate_id, StreamKey, ViewerId};

use crate::peer::{create_peer_connection, negotiate_answer};
use crate::session::PeerSession;
use crate::tracks::{StreamTrackRepository, TrackEvent};
use crate::{Error, Result};

/// Manages viewer peer connections for all active streams.
///
/// Sessions are keyed by viewer id; a viewer has at most one at a time. The
/// map is only ever locked briefly, sessions are cloned out before any await.
pub struct SignalingManager {
    repo: Arc<StreamTrackRepository>,
    sessions: RwLock<HashMap<ViewerId, Arc<PeerSession>>>,
    config: RtcConfig,
}

impl SignalingManager {
    /// Create the manager and spawn the listener that tears down viewer
    /// sessions when their stream ends.
    pub fn new(repo: Arc<StreamTrackRepository>, config: RtcConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            repo: repo.clone(),
            sessions: RwLock::new(HashMap::new()),
            config,
        });

        let weak = Arc::downgrade(&manager);
        let mut events = repo.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TrackEvent::StreamEnded(key)) => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.close_sessions_for_stream(&key).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "stream lifecycle events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        manager
    }

    /// Negotiate a viewer's offer into an answer carrying the stream's
    /// tracks.
    ///
    /// A second offer from the same viewer replaces the prior session (the
    /// old peer connection is closed first). A failed negotiation leaves no
    /// session behind.
    pub async fn handle_offer(
        self: &Arc<Self>,
        viewer_id: ViewerId,
        stream_key: StreamKey,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription> {
        let tracks = self.repo.get_stream_tracks(&stream_key)?;

        // Renegotiation: drop any prior session for this viewer.
        self.close_peer_connection(&viewer_id).await;

        let pc = create_peer_connection(&self.config).await?;

        pc.add_track(Arc::clone(&tracks.video) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        pc.add_track(Arc::clone(&tracks.audio) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let session_id = generate_id();
        let weak = Arc::downgrade(self);
        let callback_viewer = viewer_id.clone();
        let callback_session = session_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            let viewer_id = callback_viewer.clone();
            let session_id = callback_session.clone();
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed => {
                        debug!(viewer_id = %viewer_id, ?state, "peer connection terminal state");
                        if let Some(manager) = weak.upgrade() {
                            // Only the session this connection belongs to; a
                            // replacement session must survive the old
                            // connection's shutdown events.
                            manager.close_session(&viewer_id, &session_id).await;
                        }
                    }
                    _ => {}
                }
            })
        }));

        let gather_timeout = Duration::from_secs(self.config.ice_gathering_timeout_secs);
        let negotiation_timeout = Duration::from_secs(self.config.negotiation_timeout_secs);

        let answer = match tokio::time::timeout(
            negotiation_timeout,
            negotiate_answer(&pc, offer, gather_timeout),
        )
        .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                let _ = pc.close().await;
                return Err(e);
            }
            Err(_) => {
                let _ = pc.close().await;
                return Err(Error::NegotiationTimeout(viewer_id));
            }
        };

        let session = Arc::new(PeerSession::new(
            session_id,
            viewer_id.clone(),
            stream_key.clone(),
            pc,
        ));
        let displaced = self.sessions.write().insert(viewer_id.clone(), session);
        self.repo.handle_viewer_join(&stream_key);
        if displaced.is_some() {
            // A concurrent offer from the same viewer negotiated in parallel
            // and inserted first; the displaced session is closed and gives
            // back its count.
            self.finish_close(&viewer_id, displaced).await;
        }

        info!(viewer_id = %viewer_id, stream_key = %stream_key, "viewer session established");
        Ok(answer)
    }

    /// Forward a trickled ICE candidate to the viewer's peer connection.
    ///
    /// A candidate for a viewer with no session is dropped silently; the
    /// session may already have been torn down by the time it arrives.
    pub async fn handle_ice_candidate(
        &self,
        viewer_id: &ViewerId,
        candidate: RTCIceCandidateInit,
    ) {
        let session = self.sessions.read().get(viewer_id).cloned();
        let Some(session) = session else {
            debug!(viewer_id = %viewer_id, "ice candidate for unknown session, dropping");
            return;
        };

        if let Err(e) = session.pc.add_ice_candidate(candidate).await {
            warn!(viewer_id = %viewer_id, error = %e, "failed to add ice candidate");
        }
    }

    /// Close and remove a viewer's session. Safe to call repeatedly; only
    /// the call that removes the session decrements the viewer count.
    pub async fn close_peer_connection(&self, viewer_id: &ViewerId) {
        let session = self.sessions.write().remove(viewer_id);
        self.finish_close(viewer_id, session).await;
    }

    /// Close the viewer's session only if it is still the one identified by
    /// `session_id`. Used by connection state callbacks.
    async fn close_session(&self, viewer_id: &ViewerId, session_id: &str) {
        let session = {
            let mut sessions = self.sessions.write();
            match sessions.get(viewer_id) {
                Some(current) if current.session_id == session_id => sessions.remove(viewer_id),
                _ => None,
            }
        };
        self.finish_close(viewer_id, session).await;
    }

    async fn finish_close(&self, viewer_id: &ViewerId, session: Option<Arc<PeerSession>>) {
        if let Some(session) = session {
            session.close().await;
            self.repo.handle_viewer_leave(&session.stream_key);
            info!(viewer_id = %viewer_id, stream_key = %session.stream_key, "viewer session closed");
        }
    }

    /// Tear down every session watching `stream_key`.
    pub async fn close_sessions_for_stream(&self, stream_key: &StreamKey) {
        let removed: Vec<Arc<PeerSession>> = {
            let mut sessions = self.sessions.write();
            let viewers: Vec<ViewerId> = sessions
                .iter()
                .filter(|(_, s)| &s.stream_key == stream_key)
                .map(|(v, _)| v.clone())
                .collect();
            viewers
                .into_iter()
                .filter_map(|v| sessions.remove(&v))
                .collect()
        };

        if removed.is_empty() {
            return;
        }

        info!(stream_key = %stream_key, count = removed.len(), "closing sessions for ended stream");
        // The stream entry (and its counter) is already gone; only the peer
        // connections remain to be closed.
        for session in removed {
            session.close().await;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn has_session(&self, viewer_id: &ViewerId) -> bool {
        self.sessions.read().contains_key(viewer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_core::models::StreamId;
    use livecast_core::{MemoryStreamStore, PersistQueue};
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
    use webrtc::peer_connection::RTCPeerConnection;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    fn test_config() -> RtcConfig {
        RtcConfig {
            stun_servers: vec![],
            ice_gathering_timeout_secs: 5,
            negotiation_timeout_secs: 10,
        }
    }

    fn manager() -> (Arc<StreamTrackRepository>, Arc<SignalingManager>) {
        let store = Arc::new(MemoryStreamStore::new());
        let persist = PersistQueue::spawn(store, 64);
        let repo = Arc::new(StreamTrackRepository::new(persist));
        let manager = SignalingManager::new(repo.clone(), test_config());
        (repo, manager)
    }

    /// Build a recvonly client offer the way a browser viewer would.
    async fn client_offer() -> (Arc<RTCPeerConnection>, RTCSessionDescription) {
        let pc = create_peer_connection(&test_config()).await.unwrap();
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();
        pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .unwrap();
        let offer = pc.create_offer(None).await.unwrap();
        pc.set_local_description(offer.clone()).await.unwrap();
        (pc, offer)
    }

    #[tokio::test]
    async fn test_offer_for_inactive_stream_rejected() {
        let (_, manager) = manager();
        let (_pc, offer) = client_offer().await;

        let result = manager
            .handle_offer(ViewerId::from("v1"), StreamKey::from("dead"), offer)
            .await;
        assert!(matches!(result, Err(Error::StreamNotActive(_))));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_offer_yields_answer_and_session() {
        let (repo, manager) = manager();
        let key = StreamKey::from("k1");
        repo.handle_stream_start(key.clone(), StreamId::from("s1"))
            .unwrap();

        let (_pc, offer) = client_offer().await;
        let answer = manager
            .handle_offer(ViewerId::from("v1"), key.clone(), offer)
            .await
            .unwrap();

        assert_eq!(answer.sdp_type, RTCSdpType::Answer);
        assert!(manager.has_session(&ViewerId::from("v1")));
        assert_eq!(repo.viewer_count(&key), 1);
    }

    #[tokio::test]
    async fn test_duplicate_offer_replaces_session() {
        let (repo, manager) = manager();
        let key = StreamKey::from("k1");
        repo.handle_stream_start(key.clone(), StreamId::from("s1"))
            .unwrap();

        let viewer = ViewerId::from("v1");
        let (_pc1, offer1) = client_offer().await;
        manager
            .handle_offer(viewer.clone(), key.clone(), offer1)
            .await
            .unwrap();

        let (_pc2, offer2) = client_offer().await;
        manager
            .handle_offer(viewer.clone(), key.clone(), offer2)
            .await
            .unwrap();

        assert_eq!(manager.session_count(), 1);
        assert_eq!(repo.viewer_count(&key), 1);
    }

    #[tokio::test]
    async fn test_concurrent_offers_count_one_viewer() {
        let (repo, manager) = manager();
        let key = StreamKey::from("k1");
        repo.handle_stream_start(key.clone(), StreamId::from("s1"))
            .unwrap();

        let viewer = ViewerId::from("v1");
        let (_pc1, offer1) = client_offer().await;
        let (_pc2, offer2) = client_offer().await;

        // Both negotiations race past the replace-prior-session step; the
        // loser's session must be closed and its count released.
        let (r1, r2) = tokio::join!(
            manager.handle_offer(viewer.clone(), key.clone(), offer1),
            manager.handle_offer(viewer.clone(), key.clone(), offer2),
        );
        assert!(r1.is_ok());
        assert!(r2.is_ok());

        assert_eq!(manager.session_count(), 1);
        assert_eq!(repo.viewer_count(&key), 1);

        manager.close_peer_connection(&viewer).await;
        assert_eq!(repo.viewer_count(&key), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (repo, manager) = manager();
        let key = StreamKey::from("k1");
        repo.handle_stream_start(key.clone(), StreamId::from("s1"))
            .unwrap();

        let viewer = ViewerId::from("v1");
        let (_pc, offer) = client_offer().await;
        manager
            .handle_offer(viewer.clone(), key.clone(), offer)
            .await
            .unwrap();
        assert_eq!(repo.viewer_count(&key), 1);

        manager.close_peer_connection(&viewer).await;
        manager.close_peer_connection(&viewer).await;
        assert_eq!(repo.viewer_count(&key), 0);
        assert!(!manager.has_session(&viewer));
    }

    #[tokio::test]
    async fn test_ice_candidate_for_unknown_viewer_ignored() {
        let (_, manager) = manager();
        manager
            .handle_ice_candidate(
                &ViewerId::from("ghost"),
                RTCIceCandidateInit {
                    candidate: "candidate:1 1 udp 1 127.0.0.1 9 typ host".to_string(),
                    ..Default::default()
                },
            )
            .await;
    }

    #[tokio::test]
    async fn test_stream_end_tears_down_sessions() {
        let (repo, manager) = manager();
        let key = StreamKey::from("k1");
        repo.handle_stream_start(key.clone(), StreamId::from("s1"))
            .unwrap();

        let (_pc1, offer1) = client_offer().await;
        let (_pc2, offer2) = client_offer().await;
        manager
            .handle_offer(ViewerId::from("v1"), key.clone(), offer1)
            .await
            .unwrap();
        manager
            .handle_offer(ViewerId::from("v2"), key.clone(), offer2)
            .await
            .unwrap();
        assert_eq!(manager.session_count(), 2);

        repo.handle_stream_end(&key);

        // The teardown listener runs on its own task.
        for _ in 0..50 {
            if manager.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.session_count(), 0);
    }
}
