//! Stream state persistence interface.
//!
//! The signaling core only depends on this trait; real deployments plug a
//! database-backed implementation behind it. `MemoryStreamStore` backs the
//! default binary and the test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::models::{ChatMessage, Livestream, StreamId, StreamKey, StreamStatus, ViewerId};
use crate::{Error, Result};

/// Persistence operations the real-time core relies on.
///
/// Chat/viewer-count writes are best-effort from the core's perspective:
/// callers log failures and keep going. Retry policy, if any, belongs to the
/// implementation.
#[async_trait]
pub trait StreamStateStore: Send + Sync {
    /// Create a new stream record with a fresh, never-reused stream key.
    async fn create_stream(&self, title: &str) -> Result<Livestream>;

    async fn get_stream(&self, id: &StreamId) -> Result<Option<Livestream>>;

    async fn get_stream_by_key(&self, key: &StreamKey) -> Result<Option<Livestream>>;

    /// Update stream status, enforcing the monotonic
    /// OFFLINE -> LIVE -> ENDED order.
    async fn set_stream_status(&self, id: &StreamId, status: StreamStatus) -> Result<()>;

    /// Increment the persisted viewer counter. Counter updates apply only
    /// while the stream is LIVE; a stale job arriving after the stream ended
    /// must not change the count.
    async fn add_viewer(&self, id: &StreamId) -> Result<()>;

    /// Decrement the persisted viewer counter. Floors at zero; same LIVE-only
    /// rule as `add_viewer`.
    async fn remove_viewer(&self, id: &StreamId) -> Result<()>;

    async fn get_viewer_count(&self, id: &StreamId) -> Result<i64>;

    /// Append a chat message to the stream's history.
    async fn send_chat_message(
        &self,
        stream_id: &StreamId,
        user_id: &ViewerId,
        username: &str,
        content: &str,
    ) -> Result<ChatMessage>;

    /// Most recent messages, oldest first, capped at `limit`.
    async fn chat_history(&self, stream_id: &StreamId, limit: usize) -> Result<Vec<ChatMessage>>;
}

/// In-memory `StreamStateStore`.
#[derive(Default)]
pub struct MemoryStreamStore {
    streams: RwLock<HashMap<StreamId, Livestream>>,
    keys: RwLock<HashMap<StreamKey, StreamId>>,
    chat: RwLock<HashMap<StreamId, Vec<ChatMessage>>>,
}

impl MemoryStreamStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamStateStore for MemoryStreamStore {
    async fn create_stream(&self, title: &str) -> Result<Livestream> {
        let stream = Livestream::new(title);
        self.keys
            .write()
            .insert(stream.stream_key.clone(), stream.id.clone());
        self.streams
            .write()
            .insert(stream.id.clone(), stream.clone());
        Ok(stream)
    }

    async fn get_stream(&self, id: &StreamId) -> Result<Option<Livestream>> {
        Ok(self.streams.read().get(id).cloned())
    }

    async fn get_stream_by_key(&self, key: &StreamKey) -> Result<Option<Livestream>> {
        let id = match self.keys.read().get(key) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.streams.read().get(&id).cloned())
    }

    async fn set_stream_status(&self, id: &StreamId, status: StreamStatus) -> Result<()> {
        let mut streams = self.streams.write();
        let stream = streams
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("stream {id}")))?;

        if !stream.status.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                from: stream.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        stream.status = status;
        match status {
            StreamStatus::Live => stream.started_at = Some(Utc::now()),
            StreamStatus::Ended => {
                stream.ended_at = Some(Utc::now());
                stream.viewer_count = 0;
            }
            StreamStatus::Offline => {}
        }
        Ok(())
    }

    async fn add_viewer(&self, id: &StreamId) -> Result<()> {
        let mut streams = self.streams.write();
        let stream = streams
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("stream {id}")))?;
        if stream.status != StreamStatus::Live {
            debug!(stream_id = %id, "viewer join for non-live stream, ignoring");
            return Ok(());
        }
        stream.viewer_count += 1;
        Ok(())
    }

    async fn remove_viewer(&self, id: &StreamId) -> Result<()> {
        let mut streams = self.streams.write();
        let stream = streams
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("stream {id}")))?;
        if stream.status != StreamStatus::Live {
            debug!(stream_id = %id, "viewer leave for non-live stream, ignoring");
            return Ok(());
        }
        // Floor at zero: a stray leave never drives the counter negative.
        stream.viewer_count = (stream.viewer_count - 1).max(0);
        Ok(())
    }

    async fn get_viewer_count(&self, id: &StreamId) -> Result<i64> {
        self.streams
            .read()
            .get(id)
            .map(|s| s.viewer_count)
            .ok_or_else(|| Error::NotFound(format!("stream {id}")))
    }

    async fn send_chat_message(
        &self,
        stream_id: &StreamId,
        user_id: &ViewerId,
        username: &str,
        content: &str,
    ) -> Result<ChatMessage> {
        if !self.streams.read().contains_key(stream_id) {
            return Err(Error::NotFound(format!("stream {stream_id}")));
        }
        let message = ChatMessage::new(stream_id.clone(), user_id.clone(), username, content);
        self.chat
            .write()
            .entry(stream_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn chat_history(&self, stream_id: &StreamId, limit: usize) -> Result<Vec<ChatMessage>> {
        let chat = self.chat.read();
        let messages = chat.get(stream_id).map(Vec::as_slice).unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_lookup_by_key() {
        let store = MemoryStreamStore::new();
        let stream = store.create_stream("first light").await.unwrap();

        let by_id = store.get_stream(&stream.id).await.unwrap().unwrap();
        assert_eq!(by_id.title, "first light");

        let by_key = store
            .get_stream_by_key(&stream.stream_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, stream.id);

        let missing = store
            .get_stream_by_key(&StreamKey::from("nope"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_status_transition_enforced() {
        let store = MemoryStreamStore::new();
        let stream = store.create_stream("s").await.unwrap();

        store
            .set_stream_status(&stream.id, StreamStatus::Live)
            .await
            .unwrap();
        store
            .set_stream_status(&stream.id, StreamStatus::Ended)
            .await
            .unwrap();

        // Ended streams never come back under the same key.
        let err = store
            .set_stream_status(&stream.id, StreamStatus::Live)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_viewer_counter_floors_at_zero() {
        let store = MemoryStreamStore::new();
        let stream = store.create_stream("s").await.unwrap();
        store
            .set_stream_status(&stream.id, StreamStatus::Live)
            .await
            .unwrap();

        store.add_viewer(&stream.id).await.unwrap();
        store.add_viewer(&stream.id).await.unwrap();
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 2);

        store.remove_viewer(&stream.id).await.unwrap();
        store.remove_viewer(&stream.id).await.unwrap();
        store.remove_viewer(&stream.id).await.unwrap();
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counter_updates_apply_only_while_live() {
        let store = MemoryStreamStore::new();
        let stream = store.create_stream("s").await.unwrap();

        // Not yet live: nothing to count.
        store.add_viewer(&stream.id).await.unwrap();
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 0);

        store
            .set_stream_status(&stream.id, StreamStatus::Live)
            .await
            .unwrap();
        store.add_viewer(&stream.id).await.unwrap();
        store.add_viewer(&stream.id).await.unwrap();
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 2);

        // Ending zeroes the count, and a stale join arriving afterwards
        // cannot resurrect it.
        store
            .set_stream_status(&stream.id, StreamStatus::Ended)
            .await
            .unwrap();
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 0);
        store.add_viewer(&stream.id).await.unwrap();
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_chat_history_is_append_only_and_capped() {
        let store = MemoryStreamStore::new();
        let stream = store.create_stream("s").await.unwrap();
        let user = ViewerId::from("v1");

        for i in 0..5 {
            store
                .send_chat_message(&stream.id, &user, "ana", &format!("msg {i}"))
                .await
                .unwrap();
        }

        let all = store.chat_history(&stream.id, 100).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "msg 0");
        assert_eq!(all[4].content, "msg 4");

        let tail = store.chat_history(&stream.id, 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "msg 3");
    }

    #[tokio::test]
    async fn test_chat_for_unknown_stream_fails() {
        let store = MemoryStreamStore::new();
        let err = store
            .send_chat_message(&StreamId::from("missing"), &ViewerId::from("v"), "ana", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
