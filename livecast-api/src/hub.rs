//! In-memory registry of live WebSocket connections, grouped by stream key.
//!
//! A single coordinator task owns all the maps; handlers talk to it through
//! commands, so there are no locks to hold across awaits. Each connection
//! gets a bounded outbound queue; a connection whose queue is full when a
//! broadcast arrives is evicted instead of stalling everyone else.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use livecast_core::models::{StreamKey, ViewerId};

pub type ConnectionId = String;

struct Subscriber {
    viewer_id: ViewerId,
    stream_key: StreamKey,
    sender: mpsc::Sender<String>,
}

enum HubCommand {
    Register {
        connection_id: ConnectionId,
        viewer_id: ViewerId,
        stream_key: StreamKey,
        sender: mpsc::Sender<String>,
    },
    Unregister {
        connection_id: ConnectionId,
    },
    Broadcast {
        stream_key: StreamKey,
        message: String,
    },
    ConnectionCount {
        reply: oneshot::Sender<usize>,
    },
    SubscriberCount {
        stream_key: StreamKey,
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the connection coordinator. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionRegistry {
    tx: mpsc::UnboundedSender<HubCommand>,
    queue_size: usize,
}

impl ConnectionRegistry {
    /// Spawn the coordinator. `queue_size` is the per-connection outbound
    /// queue capacity.
    pub fn new(queue_size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(coordinator(rx));
        Self { tx, queue_size }
    }

    /// Register a connection under a stream key. Returns the connection's
    /// outbound queue: the sender for unicast replies, the receiver for the
    /// connection's writer task to drain.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        viewer_id: ViewerId,
        stream_key: StreamKey,
    ) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(self.queue_size);
        let _ = self.tx.send(HubCommand::Register {
            connection_id,
            viewer_id,
            stream_key,
            sender: sender.clone(),
        });
        (sender, receiver)
    }

    /// Remove a connection. Safe to call after an eviction already did.
    pub fn unregister(&self, connection_id: &str) {
        let _ = self.tx.send(HubCommand::Unregister {
            connection_id: connection_id.to_string(),
        });
    }

    /// Queue `message` to every connection subscribed to `stream_key`.
    pub fn broadcast(&self, stream_key: &StreamKey, message: String) {
        let _ = self.tx.send(HubCommand::Broadcast {
            stream_key: stream_key.clone(),
            message,
        });
    }

    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::ConnectionCount { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn subscriber_count(&self, stream_key: &StreamKey) -> usize {
        let (reply, rx) = oneshot::channel();
        let cmd = HubCommand::SubscriberCount {
            stream_key: stream_key.clone(),
            reply,
        };
        if self.tx.send(cmd).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

async fn coordinator(mut rx: mpsc::UnboundedReceiver<HubCommand>) {
    let mut connections: HashMap<ConnectionId, Subscriber> = HashMap::new();
    let mut streams: HashMap<StreamKey, Vec<ConnectionId>> = HashMap::new();

    debug!("connection coordinator started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Register {
                connection_id,
                viewer_id,
                stream_key,
                sender,
            } => {
                info!(
                    connection_id = %connection_id,
                    viewer_id = %viewer_id,
                    stream_key = %stream_key,
                    "connection registered"
                );
                streams
                    .entry(stream_key.clone())
                    .or_default()
                    .push(connection_id.clone());
                connections.insert(
                    connection_id,
                    Subscriber {
                        viewer_id,
                        stream_key,
                        sender,
                    },
                );
            }
            HubCommand::Unregister { connection_id } => {
                remove_connection(&mut connections, &mut streams, &connection_id);
            }
            HubCommand::Broadcast {
                stream_key,
                message,
            } => {
                let Some(ids) = streams.get(&stream_key) else {
                    continue;
                };

                let mut evicted = Vec::new();
                for id in ids {
                    let Some(sub) = connections.get(id) else {
                        continue;
                    };
                    match sub.sender.try_send(message.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(
                                connection_id = %id,
                                viewer_id = %sub.viewer_id,
                                "outbound queue full, evicting slow consumer"
                            );
                            evicted.push(id.clone());
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            evicted.push(id.clone());
                        }
                    }
                }
                for id in evicted {
                    remove_connection(&mut connections, &mut streams, &id);
                }
            }
            HubCommand::ConnectionCount { reply } => {
                let _ = reply.send(connections.len());
            }
            HubCommand::SubscriberCount { stream_key, reply } => {
                let count = streams.get(&stream_key).map_or(0, Vec::len);
                let _ = reply.send(count);
            }
        }
    }
    debug!("connection coordinator stopped");
}

fn remove_connection(
    connections: &mut HashMap<ConnectionId, Subscriber>,
    streams: &mut HashMap<StreamKey, Vec<ConnectionId>>,
    connection_id: &str,
) {
    let Some(sub) = connections.remove(connection_id) else {
        return;
    };
    if let Some(ids) = streams.get_mut(&sub.stream_key) {
        ids.retain(|id| id != connection_id);
        if ids.is_empty() {
            streams.remove(&sub.stream_key);
            debug!(stream_key = %sub.stream_key, "stream has no more connections");
        }
    }
    info!(connection_id = %connection_id, viewer_id = %sub.viewer_id, "connection removed");
}
