//! Core data model shared across the Livecast crates.

pub mod chat;
pub mod id;
pub mod stream;

pub use chat::ChatMessage;
pub use id::{generate_id, StreamId, StreamKey, ViewerId};
pub use stream::{Livestream, StreamStatus};
