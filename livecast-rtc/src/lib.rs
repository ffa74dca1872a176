//! Livecast RTC
//!
//! WebRTC fan-out for live streams: per-stream media track registry and the
//! signaling manager that negotiates viewer peer connections against it.

pub mod error;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod tracks;

pub use error::{Error, Result};
pub use signaling::SignalingManager;
pub use tracks::{MediaTrackPair, StreamTrackRepository, TrackEvent};
