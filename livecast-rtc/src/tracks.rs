//! Media track registry keyed by stream key.
//!
//! One entry per live stream: the broadcaster's RTP tracks plus an in-memory
//! viewer counter. Entries exist only between `handle_stream_start` and
//! `handle_stream_end`; everything else reads through them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use livecast_core::models::{StreamId, StreamKey};
use livecast_core::PersistQueue;

use crate::{Error, Result};

/// Local RTP tracks a stream publishes. Viewers get both attached to their
/// peer connection.
#[derive(Clone)]
pub struct MediaTrackPair {
    pub video: Arc<TrackLocalStaticRTP>,
    pub audio: Arc<TrackLocalStaticRTP>,
}

struct StreamEntry {
    stream_id: StreamId,
    tracks: MediaTrackPair,
    viewers: i64,
}

/// Lifecycle events other components subscribe to.
#[derive(Clone, Debug)]
pub enum TrackEvent {
    StreamEnded(StreamKey),
}

/// Registry of active streams and their media tracks.
pub struct StreamTrackRepository {
    streams: DashMap<StreamKey, StreamEntry>,
    persist: PersistQueue,
    events: broadcast::Sender<TrackEvent>,
}

impl StreamTrackRepository {
    pub fn new(persist: PersistQueue) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            streams: DashMap::new(),
            persist,
            events,
        }
    }

    /// Subscribe to stream lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.events.subscribe()
    }

    /// Register a stream going live: allocate its VP8/Opus track pair and a
    /// zeroed viewer counter.
    pub fn handle_stream_start(&self, key: StreamKey, stream_id: StreamId) -> Result<MediaTrackPair> {
        if self.streams.contains_key(&key) {
            return Err(Error::StreamAlreadyActive(key));
        }

        let video = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            format!("livecast-{key}"),
        ));
        let audio = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            format!("livecast-{key}"),
        ));

        let tracks = MediaTrackPair { video, audio };
        self.streams.insert(
            key.clone(),
            StreamEntry {
                stream_id,
                tracks: tracks.clone(),
                viewers: 0,
            },
        );

        info!(stream_key = %key, "stream tracks registered");
        Ok(tracks)
    }

    /// Tear down a stream's entry and notify subscribers. Idempotent.
    pub fn handle_stream_end(&self, key: &StreamKey) {
        if self.streams.remove(key).is_some() {
            info!(stream_key = %key, "stream tracks removed");
            let _ = self.events.send(TrackEvent::StreamEnded(key.clone()));
        } else {
            debug!(stream_key = %key, "stream end for unknown key, ignoring");
        }
    }

    /// Tracks for a live stream, or `StreamNotActive`.
    pub fn get_stream_tracks(&self, key: &StreamKey) -> Result<MediaTrackPair> {
        self.streams
            .get(key)
            .map(|entry| entry.tracks.clone())
            .ok_or_else(|| Error::StreamNotActive(key.clone()))
    }

    /// Bump the in-memory viewer counter and enqueue the persisted update.
    pub fn handle_viewer_join(&self, key: &StreamKey) {
        match self.streams.get_mut(key) {
            Some(mut entry) => {
                entry.viewers += 1;
                debug!(stream_key = %key, viewers = entry.viewers, "viewer joined");
                self.persist.viewer_joined(entry.stream_id.clone());
            }
            None => warn!(stream_key = %key, "viewer join for unknown stream, ignoring"),
        }
    }

    /// Decrement the viewer counter, flooring at zero.
    pub fn handle_viewer_leave(&self, key: &StreamKey) {
        match self.streams.get_mut(key) {
            Some(mut entry) => {
                if entry.viewers > 0 {
                    entry.viewers -= 1;
                    self.persist.viewer_left(entry.stream_id.clone());
                }
                debug!(stream_key = %key, viewers = entry.viewers, "viewer left");
            }
            None => warn!(stream_key = %key, "viewer leave for unknown stream, ignoring"),
        }
    }

    /// In-memory viewer count; zero for inactive streams.
    pub fn viewer_count(&self, key: &StreamKey) -> i64 {
        self.streams.get(key).map_or(0, |entry| entry.viewers)
    }

    pub fn is_active(&self, key: &StreamKey) -> bool {
        self.streams.contains_key(key)
    }

    pub fn active_stream_count(&self) -> usize {
        self.streams.len()
    }
}
