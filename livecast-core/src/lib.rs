//! Livecast core
//!
//! Shared foundation for the real-time signaling subsystem: the data model
//! (streams, chat, ids), the `StreamStateStore` persistence interface with an
//! in-memory implementation, the bounded viewer-count persistence queue, and
//! configuration/logging setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod persist;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use persist::PersistQueue;
pub use store::{MemoryStreamStore, StreamStateStore};
