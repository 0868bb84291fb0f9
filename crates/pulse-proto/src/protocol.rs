//! Reserved protocol methods and their typed payloads.
//!
//! These four method names drive the connect handshake and the liveness
//! sweep. Application handlers registered under one of them override the
//! built-in (override semantics are accepted, not prevented).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client → server: register the carried identity.
pub const CLIENT_REQUEST_CONNECT: &str = "client_request_connect";
/// Server → all: acceptance broadcast, personalized via `sendToUUID`.
pub const SERVER_ACCEPTED_CONNECT: &str = "server_accepted_connect";
/// Server → all: liveness challenge for a freshly rotated epoch.
pub const SERVER_PROBE: &str = "server_probe";
/// Client → server: liveness answer.
pub const CLIENT_RETURN_PROBE: &str = "client_return_probe";

/// Whether `method` is one of the reserved protocol methods.
pub fn is_reserved(method: &str) -> bool {
    matches!(
        method,
        CLIENT_REQUEST_CONNECT | SERVER_ACCEPTED_CONNECT | SERVER_PROBE | CLIENT_RETURN_PROBE
    )
}

/// Payload of [`SERVER_ACCEPTED_CONNECT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedConnect {
    /// Server id.
    pub id: Uuid,
    /// Server port.
    pub port: u16,
    /// Registry size after this registration.
    #[serde(rename = "numClients")]
    pub num_clients: usize,
    /// The client this acceptance addresses; everyone else ignores it.
    #[serde(rename = "sendToUUID")]
    pub send_to_uuid: Uuid,
    /// Epoch the addressed client must adopt and echo back.
    #[serde(rename = "firstRefreshID")]
    pub first_refresh_id: Uuid,
}

/// Payload of [`SERVER_PROBE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeChallenge {
    /// The epoch peers must answer before the next sweep.
    #[serde(rename = "refreshID")]
    pub refresh_id: Uuid,
    /// Server id.
    pub id: Uuid,
    /// Server port. Clients answer only probes matching their own server's
    /// port; rebroadcast probes from other buses are ignored.
    pub port: u16,
}

/// Payload of [`CLIENT_RETURN_PROBE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReply {
    /// Epoch being answered. The server stamps its own current epoch
    /// regardless; this field is informational.
    #[serde(rename = "refreshID")]
    pub refresh_id: Uuid,
    /// Answering peer's id.
    pub id: Uuid,
    /// Id of the server being answered.
    #[serde(rename = "serverID")]
    pub server_id: Uuid,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
