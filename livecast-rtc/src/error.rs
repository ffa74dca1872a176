use livecast_core::models::{StreamKey, ViewerId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An offer arrived for a stream key with no published tracks. The only
    /// negotiation error surfaced to callers; no session state is created.
    #[error("Stream not active: {0}")]
    StreamNotActive(StreamKey),

    /// `handle_stream_start` was called for a key that is already live.
    #[error("Stream already active: {0}")]
    StreamAlreadyActive(StreamKey),

    #[error("Negotiation timed out for viewer {0}")]
    NegotiationTimeout(ViewerId),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
