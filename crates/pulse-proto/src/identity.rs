//! Client and server self-descriptions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client's self-description, sent verbatim as the
/// `client_request_connect` payload.
///
/// `refresh_tag` starts as a locally minted value the server will never
/// match; the client adopts the server's epoch from the acceptance message
/// and answers probes from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Stable peer id, immutable for the life of the client.
    pub id: Uuid,
    /// Most recent liveness epoch this client has adopted.
    #[serde(rename = "refreshID")]
    pub refresh_tag: Uuid,
    /// Host the client dials.
    pub host: String,
    /// Server port the client is bound to.
    pub port: u16,
}

impl ClientIdentity {
    /// Mint an identity with a fresh id and refresh tag.
    pub fn generate(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            refresh_tag: Uuid::new_v4(),
            host: host.into(),
            port,
        }
    }
}

/// The immutable half of a server's identity.
///
/// The mutable half (`numClients`, the current epoch) lives with the peer
/// registry so membership and counters change under one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Stable server id, minted at startup.
    pub id: Uuid,
    /// Port the server answers on, echoed in probes and acceptances.
    pub port: u16,
}

impl ServerIdentity {
    /// Mint a fresh identity for a server answering on `port`.
    pub fn generate(port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            port,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
