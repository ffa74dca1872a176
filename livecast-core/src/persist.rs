//! Bounded persistence queue for viewer-count propagation.
//!
//! Viewer join/leave updates are applied to the in-memory counters first and
//! propagated to the `StreamStateStore` through this queue. The in-memory and
//! persisted counters may transiently diverge; `flush` marks the point where
//! they have reconciled, so tests can await it deterministically.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::models::StreamId;
use crate::store::StreamStateStore;

/// Jobs handled by the persistence worker.
enum PersistJob {
    ViewerJoined(StreamId),
    ViewerLeft(StreamId),
    Flush(oneshot::Sender<()>),
}

/// Handle to the persistence worker task.
///
/// Enqueueing never blocks the caller: a full queue drops the job with a
/// warning (counters are best-effort, per the error-handling contract).
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<PersistJob>,
}

impl PersistQueue {
    /// Spawn the worker task draining jobs into `store`.
    pub fn spawn(store: Arc<dyn StreamStateStore>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(persist_worker(store, rx));
        Self { tx }
    }

    pub fn viewer_joined(&self, stream_id: StreamId) {
        self.enqueue(PersistJob::ViewerJoined(stream_id));
    }

    pub fn viewer_left(&self, stream_id: StreamId) {
        self.enqueue(PersistJob::ViewerLeft(stream_id));
    }

    /// Wait until every job enqueued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(PersistJob::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    fn enqueue(&self, job: PersistJob) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(job) {
            warn!("persistence queue full, dropping viewer-count update");
        }
    }
}

async fn persist_worker(store: Arc<dyn StreamStateStore>, mut rx: mpsc::Receiver<PersistJob>) {
    debug!("persistence worker started");
    while let Some(job) = rx.recv().await {
        match job {
            PersistJob::ViewerJoined(stream_id) => {
                if let Err(e) = store.add_viewer(&stream_id).await {
                    warn!(stream_id = %stream_id, error = %e, "failed to persist viewer join");
                }
            }
            PersistJob::ViewerLeft(stream_id) => {
                if let Err(e) = store.remove_viewer(&stream_id).await {
                    warn!(stream_id = %stream_id, error = %e, "failed to persist viewer leave");
                }
            }
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStreamStore;

    #[tokio::test]
    async fn test_counts_reconcile_after_flush() {
        let store = Arc::new(MemoryStreamStore::new());
        let stream = store.create_stream("s").await.unwrap();
        store
            .set_stream_status(&stream.id, crate::models::StreamStatus::Live)
            .await
            .unwrap();
        let queue = PersistQueue::spawn(store.clone(), 64);

        queue.viewer_joined(stream.id.clone());
        queue.viewer_joined(stream.id.clone());
        queue.viewer_left(stream.id.clone());

        queue.flush().await;
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_failures_are_absorbed() {
        let store = Arc::new(MemoryStreamStore::new());
        let queue = PersistQueue::spawn(store, 64);

        // Unknown stream: the worker logs and keeps draining.
        queue.viewer_joined(StreamId::from("missing"));
        queue.flush().await;
    }

    #[tokio::test]
    async fn test_stale_jobs_after_stream_end_are_ignored() {
        let store = Arc::new(MemoryStreamStore::new());
        let stream = store.create_stream("s").await.unwrap();
        store
            .set_stream_status(&stream.id, crate::models::StreamStatus::Live)
            .await
            .unwrap();
        store
            .set_stream_status(&stream.id, crate::models::StreamStatus::Ended)
            .await
            .unwrap();
        let queue = PersistQueue::spawn(store.clone(), 64);

        // A join still in flight when the stream ended must not leave a
        // nonzero count on the ended record.
        queue.viewer_joined(stream.id.clone());
        queue.flush().await;
        assert_eq!(store.get_viewer_count(&stream.id).await.unwrap(), 0);
    }
}
