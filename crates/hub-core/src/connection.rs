//! Live socket connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::ids::ConnectionId;

/// A connected socket client.
///
/// Holds only what is needed to reach the client. Topic membership is kept
/// in the [`ConnectionRegistry`](crate::ConnectionRegistry) index.
pub struct Connection {
    id: ConnectionId,
    /// Send channel to the socket's writer task.
    tx: mpsc::Sender<Arc<str>>,
    connected_at: Instant,
    /// Last Pong (or any inbound frame) from the client.
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a new connection around the writer task's channel.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Enqueue a frame without waiting.
    ///
    /// Returns `false` if the channel is full or closed, and bumps the
    /// dropped-message counter.
    pub fn try_send(&self, frame: Arc<str>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Enqueue a frame, waiting for channel capacity.
    ///
    /// Used for responses, which must not be dropped. Returns `false` only
    /// when the writer side has gone away.
    pub async fn send(&self, frame: Arc<str>) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    /// Frames dropped because the channel was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (pong or request).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the client was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
