use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{StreamId, StreamKey};

/// Livestream lifecycle status.
///
/// Transitions are monotonic: OFFLINE -> LIVE -> ENDED. A stream key is
/// never reactivated once ended; a new broadcast gets a new record and key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Offline,
    Live,
    Ended,
}

impl StreamStatus {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Offline, Self::Live) | (Self::Live, Self::Ended)
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Live => "LIVE",
            Self::Ended => "ENDED",
        }
    }
}

/// Livestream record as persisted by the `StreamStateStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Livestream {
    pub id: StreamId,
    pub stream_key: StreamKey,
    pub title: String,
    pub status: StreamStatus,
    pub viewer_count: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Livestream {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: StreamId::new(),
            stream_key: StreamKey::generate(),
            title: title.into(),
            status: StreamStatus::Offline,
            viewer_count: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status == StreamStatus::Live
    }
}
