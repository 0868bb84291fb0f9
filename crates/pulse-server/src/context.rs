//! Shared server state and the per-message dispatch context.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use pulse_proto::{HandlerTable, ServerIdentity};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::PeerLink;
use crate::registry::PeerRegistry;

/// State shared by every session, the sweeper, and the HTTP surface.
pub struct ServerState {
    /// Effective configuration.
    pub config: ServerConfig,
    /// Peer registry backing registration, liveness, and fan-out.
    pub registry: Arc<PeerRegistry>,
    /// Encode-once broadcast engine over the registry.
    pub broadcaster: Broadcaster,
    /// Method dispatch table (application handlers plus built-ins).
    pub handlers: HandlerTable<SessionContext>,
    server_id: Uuid,
    /// Port advertised in protocol messages. Config port until the
    /// listener binds; the real bound port afterwards (matters for
    /// port 0).
    advertised_port: AtomicU16,
}

impl ServerState {
    /// Assemble fresh state around a configuration and handler table.
    pub fn new(config: ServerConfig, handlers: HandlerTable<SessionContext>) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let advertised_port = AtomicU16::new(config.port);
        Self {
            config,
            registry,
            broadcaster,
            handlers,
            server_id: Uuid::new_v4(),
            advertised_port,
        }
    }

    /// The identity this server stamps on probes and acceptances.
    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity {
            id: self.server_id,
            port: self.advertised_port.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_advertised_port(&self, port: u16) {
        self.advertised_port.store(port, Ordering::Relaxed);
    }
}

/// Context handed to method handlers: the server state plus the
/// connection the message arrived on.
pub struct SessionContext {
    /// Shared server state.
    pub state: Arc<ServerState>,
    /// Link for the connection that delivered the message.
    pub link: Arc<PeerLink>,
}
