//! Peer registry: connection links, announced identities, and the probe epoch.
//!
//! Everything lives behind one [`RwLock`] so registrations, evictions, and
//! fan-out passes each observe a consistent view. Identities are kept in
//! registration order and duplicates are tolerated; lookups and tag updates
//! act on the first match.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use pulse_proto::ClientIdentity;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::PeerLink;

/// One registered peer as the server tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Bus-level peer ID, chosen by the client.
    pub id: Uuid,
    /// The epoch tag this peer last answered with.
    pub refresh_tag: Uuid,
    /// Host the client reported for itself.
    pub host: String,
    /// Port the client reported for itself.
    pub port: u16,
    /// Number of probe rounds this peer has missed.
    pub warning_count: u32,
}

impl PeerIdentity {
    /// Build a registry entry from a connect announcement.
    pub fn from_announcement(announcement: &ClientIdentity) -> Self {
        Self {
            id: announcement.id,
            refresh_tag: announcement.refresh_tag,
            host: announcement.host.clone(),
            port: announcement.port,
            warning_count: 0,
        }
    }
}

/// Result of one liveness sweep: who was evicted and the epoch now in force.
#[derive(Debug)]
pub struct SweepReport {
    /// Peers removed because their tag did not match the swept epoch.
    pub evicted: Vec<PeerIdentity>,
    /// The freshly rotated epoch carried by the next probe.
    pub epoch: Uuid,
}

/// Delivery summary for one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Connections the payload was offered to (after exclusion).
    pub attempted: usize,
    /// Payloads accepted by connection queues.
    pub delivered: usize,
}

struct RegistryInner {
    /// Live connections indexed by connection ID.
    links: HashMap<Uuid, Arc<PeerLink>>,
    /// Announced identities in registration order, duplicates tolerated.
    peers: Vec<PeerIdentity>,
    /// Epoch the next probe will carry; answers are matched against it.
    current_epoch: Uuid,
}

/// Shared peer state for the whole server.
pub struct PeerRegistry {
    inner: RwLock<RegistryInner>,
}

impl PeerRegistry {
    /// Create an empty registry with a fresh starting epoch.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                links: HashMap::new(),
                peers: Vec::new(),
                current_epoch: Uuid::new_v4(),
            }),
        }
    }

    // ── Connection links ────────────────────────────────────────────

    /// Track a new connection.
    pub async fn attach(&self, link: Arc<PeerLink>) {
        let mut inner = self.inner.write().await;
        let _ = inner.links.insert(link.conn_id(), link);
    }

    /// Drop a connection and every identity registered through it.
    ///
    /// This is the single removal path for a departing connection: the
    /// link and all registrations bound to its peer go together, so the
    /// two tables cannot drift. Calling it again for the same connection
    /// is a no-op. Returns the identities that were released.
    pub async fn detach(&self, conn_id: Uuid) -> Vec<PeerIdentity> {
        let mut inner = self.inner.write().await;
        let Some(link) = inner.links.remove(&conn_id) else {
            return Vec::new();
        };
        let Some(peer_id) = link.peer_id() else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(inner.peers.len());
        for peer in inner.peers.drain(..) {
            if peer.id == peer_id {
                removed.push(peer);
            } else {
                kept.push(peer);
            }
        }
        inner.peers = kept;
        gauge!("bus_clients").set(inner.peers.len() as f64);
        removed
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.links.len()
    }

    /// Offer an encoded payload to every live connection.
    ///
    /// The read guard is held for the whole pass, so the recipient set is
    /// exactly the registry state at one instant. Sends that fail because
    /// a queue is full or closed are skipped; the connection stays
    /// attached until the sweep or its own disconnect removes it.
    pub async fn fan_out(&self, payload: &Arc<String>, exclude: Option<Uuid>) -> Delivery {
        let inner = self.inner.read().await;
        let mut delivery = Delivery::default();
        for link in inner.links.values() {
            if Some(link.conn_id()) == exclude {
                continue;
            }
            delivery.attempted += 1;
            if link.send(Arc::clone(payload)) {
                delivery.delivered += 1;
            } else {
                debug!(conn = %link.conn_id(), "skipped unreachable connection");
            }
        }
        delivery
    }

    // ── Identities ──────────────────────────────────────────────────

    /// Append a peer registration. Returns the registered-peer count
    /// including the new entry.
    pub async fn register(&self, peer: PeerIdentity) -> usize {
        let mut inner = self.inner.write().await;
        inner.peers.push(peer);
        gauge!("bus_clients").set(inner.peers.len() as f64);
        inner.peers.len()
    }

    /// Stamp a new refresh tag on the first registration matching
    /// `peer_id`. Returns `false` when no registration matches.
    pub async fn update_refresh_tag(&self, peer_id: Uuid, tag: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        match inner.peers.iter_mut().find(|p| p.id == peer_id) {
            Some(peer) => {
                peer.refresh_tag = tag;
                true
            }
            None => false,
        }
    }

    /// The first registration matching `peer_id`, if any.
    pub async fn find_by_id(&self, peer_id: Uuid) -> Option<PeerIdentity> {
        let inner = self.inner.read().await;
        inner.peers.iter().find(|p| p.id == peer_id).cloned()
    }

    /// Remove every registration whose tag does not match `epoch` and
    /// return them, each with its missed-probe count bumped.
    pub async fn evict_stale(&self, epoch: Uuid) -> Vec<PeerIdentity> {
        let mut inner = self.inner.write().await;
        Self::evict_locked(&mut inner, epoch)
    }

    /// Replace the current epoch with a fresh one and return it.
    pub async fn rotate_epoch(&self) -> Uuid {
        let mut inner = self.inner.write().await;
        inner.current_epoch = Uuid::new_v4();
        inner.current_epoch
    }

    /// One liveness sweep: evict peers that missed the closing epoch,
    /// then rotate to a new one. Both steps happen under a single write
    /// guard, so no registration can slip between them.
    pub async fn sweep(&self) -> SweepReport {
        let mut inner = self.inner.write().await;
        let closing_epoch = inner.current_epoch;
        let evicted = Self::evict_locked(&mut inner, closing_epoch);
        inner.current_epoch = Uuid::new_v4();
        SweepReport {
            evicted,
            epoch: inner.current_epoch,
        }
    }

    fn evict_locked(inner: &mut RegistryInner, epoch: Uuid) -> Vec<PeerIdentity> {
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(inner.peers.len());
        for mut peer in inner.peers.drain(..) {
            if peer.refresh_tag == epoch {
                kept.push(peer);
            } else {
                peer.warning_count += 1;
                evicted.push(peer);
            }
        }
        inner.peers = kept;
        if !evicted.is_empty() {
            gauge!("bus_clients").set(inner.peers.len() as f64);
        }
        evicted
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// Every registration, in registration order.
    pub async fn all(&self) -> Vec<PeerIdentity> {
        self.inner.read().await.peers.clone()
    }

    /// Number of registered peers.
    pub async fn num_clients(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    /// The epoch the next probe will carry.
    pub async fn current_epoch(&self) -> Uuid {
        self.inner.read().await.current_epoch
    }

    /// Log the registered-peer set at info level.
    pub async fn log_snapshot(&self) {
        let inner = self.inner.read().await;
        let peers: Vec<String> = inner
            .peers
            .iter()
            .map(|p| format!("{}@{}:{}", p.id, p.host, p.port))
            .collect();
        info!(count = peers.len(), ?peers, "registered peers");
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
