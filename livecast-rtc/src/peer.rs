//! Peer-connection construction and SDP exchange helpers.

use std::sync::Arc;
use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use livecast_core::config::RtcConfig;

use crate::Result;

/// Create a new `RTCPeerConnection` with default codecs and interceptors,
/// using the configured STUN servers.
pub async fn create_peer_connection(config: &RtcConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let ice_servers = if config.stun_servers.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: config.stun_servers.clone(),
            ..Default::default()
        }]
    };

    let pc = api
        .new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await?;

    Ok(Arc::new(pc))
}

/// Apply a remote offer and produce the local answer.
///
/// Waits for ICE candidate gathering to complete (bounded by
/// `gather_timeout`) so the returned description carries the server's host
/// candidates; one offer yields one answer, no trickle round trips.
pub async fn negotiate_answer(
    pc: &Arc<RTCPeerConnection>,
    offer: RTCSessionDescription,
    gather_timeout: Duration,
) -> Result<RTCSessionDescription> {
    pc.set_remote_description(offer).await?;

    let answer = pc.create_answer(None).await?;

    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    let _ = tokio::time::timeout(gather_timeout, gather_complete.recv()).await;

    pc.local_description().await.ok_or_else(|| {
        crate::Error::Internal("local description unavailable after ICE gathering".to_string())
    })
}
