//! Per-connection send handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Send side of one WebSocket connection.
///
/// Outbound messages are queued on a bounded channel drained by the
/// connection's write task, so a stalled socket never blocks a broadcast.
pub struct PeerLink {
    /// Transport-level connection ID, minted at accept time.
    conn_id: Uuid,
    /// Bus-level peer ID (set once the peer announces itself).
    peer_id: Mutex<Option<Uuid>>,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    connected_at: Instant,
    /// Count of messages dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
}

impl PeerLink {
    /// Create a new link around the write task's channel.
    pub fn new(conn_id: Uuid, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            conn_id,
            peer_id: Mutex::new(None),
            tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Transport-level connection ID.
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Bind this connection to an announced peer. The latest announcement
    /// wins if a peer announces itself more than once.
    pub fn bind_peer(&self, peer_id: Uuid) {
        *self.peer_id.lock() = Some(peer_id);
    }

    /// The bus-level peer ID, if the peer has announced itself.
    pub fn peer_id(&self) -> Option<Uuid> {
        *self.peer_id.lock()
    }

    /// Queue a text frame for this connection.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter. A failed send never tears the
    /// connection down; the liveness sweep is the only cleanup path.
    pub fn send(&self, payload: Arc<String>) -> bool {
        if self.tx.try_send(payload).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
