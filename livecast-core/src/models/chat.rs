use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{StreamId, ViewerId};

/// Chat message attached to a livestream. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String, // nanoid(12)
    pub stream_id: StreamId,
    pub user_id: ViewerId,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        stream_id: StreamId,
        user_id: ViewerId,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: super::id::generate_id(),
            stream_id,
            user_id,
            username: username.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_ids_are_unique() {
        let stream_id = StreamId::new();
        let user_id = ViewerId::new();
        let m1 = ChatMessage::new(stream_id.clone(), user_id.clone(), "ana", "hi");
        let m2 = ChatMessage::new(stream_id, user_id, "ana", "hi");
        assert_ne!(m1.id, m2.id);
    }
}
