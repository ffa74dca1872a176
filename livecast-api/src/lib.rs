//! Livecast API
//!
//! The server surface: connection registry (hub), per-connection message
//! router, and the axum HTTP/WebSocket endpoints.

pub mod http;
pub mod hub;
pub mod router;

pub use http::{create_router, AppState};
pub use hub::ConnectionRegistry;
pub use router::MessageRouter;
