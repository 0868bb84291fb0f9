//! Message fan-out to connected peers.

use std::sync::Arc;

use metrics::counter;
use pulse_proto::Envelope;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::registry::PeerRegistry;

/// Encodes a message once and offers it to every live connection.
pub struct Broadcaster {
    registry: Arc<PeerRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over the shared registry.
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast `method` with `params` to every connection except the
    /// excluded one.
    ///
    /// Failures stay local: an encoding failure drops the whole
    /// broadcast with a warning, a delivery failure skips that one
    /// connection. Neither is surfaced to the caller.
    pub async fn broadcast(
        &self,
        method: &str,
        params: impl Serialize + Send,
        exclude: Option<Uuid>,
    ) {
        let payload = match Envelope::new(method, params).and_then(|env| env.encode()) {
            Ok(text) => Arc::new(text),
            Err(error) => {
                warn!(method, %error, "failed to encode broadcast, dropping");
                return;
            }
        };
        let delivery = self.registry.fan_out(&payload, exclude).await;
        let dropped = delivery.attempted - delivery.delivered;
        if dropped > 0 {
            counter!("bus_broadcast_drops_total").increment(dropped as u64);
        }
        debug!(
            method,
            attempted = delivery.attempted,
            delivered = delivery.delivered,
            "broadcast"
        );
    }
}
