//! Shared client state and the cloneable send handle.

use std::sync::Arc;

use parking_lot::Mutex;
use pulse_proto::{ClientIdentity, Envelope};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::client::ClientError;
use crate::config::ClientConfig;

/// State shared between the session loop, the built-in handlers, and every
/// send handle.
pub struct ClientState {
    /// The settings this client was built with.
    pub config: ClientConfig,
    identity: ClientIdentity,
    refresh_tag: Mutex<Uuid>,
}

impl ClientState {
    /// Mint a fresh identity for the configured server.
    pub fn new(config: ClientConfig) -> Self {
        let identity = ClientIdentity::generate(config.host.clone(), config.port);
        let refresh_tag = Mutex::new(identity.refresh_tag);
        Self {
            config,
            identity,
            refresh_tag,
        }
    }

    /// The identity announced at connect. Immutable once minted.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// This client's peer id.
    pub fn id(&self) -> Uuid {
        self.identity.id
    }

    /// The liveness epoch most recently adopted from the server. Starts as
    /// the locally minted tag, which no server epoch will ever match.
    pub fn refresh_tag(&self) -> Uuid {
        *self.refresh_tag.lock()
    }

    /// Adopt a server epoch as the current refresh tag.
    pub fn adopt_refresh_tag(&self, tag: Uuid) {
        *self.refresh_tag.lock() = tag;
    }
}

/// Cloneable handle for publishing messages while the session runs.
#[derive(Clone)]
pub struct ClientContext {
    /// Shared client state.
    pub state: Arc<ClientState>,
    tx: mpsc::Sender<String>,
}

impl ClientContext {
    pub(crate) fn new(state: Arc<ClientState>, tx: mpsc::Sender<String>) -> Self {
        Self { state, tx }
    }

    /// Queue a message for the server.
    ///
    /// The writer task drains the queue in order; this only fails when the
    /// session is gone or the queue is at capacity with a closed far end.
    pub async fn send(
        &self,
        method: &str,
        params: impl Serialize + Send,
    ) -> Result<(), ClientError> {
        let text = Envelope::new(method, params)?.encode()?;
        self.tx
            .send(text)
            .await
            .map_err(|_| ClientError::ChannelClosed)?;
        debug!(method, "message queued for server");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_context() -> (ClientContext, mpsc::Receiver<String>) {
        let state = Arc::new(ClientState::new(ClientConfig::default()));
        let (tx, rx) = mpsc::channel(8);
        (ClientContext::new(state, tx), rx)
    }

    #[test]
    fn identity_announces_configured_server() {
        let config = ClientConfig {
            host: "10.0.0.5".into(),
            port: 4100,
            ..ClientConfig::default()
        };
        let state = ClientState::new(config);
        assert_eq!(state.identity().host, "10.0.0.5");
        assert_eq!(state.identity().port, 4100);
    }

    #[test]
    fn refresh_tag_starts_as_minted_value() {
        let state = ClientState::new(ClientConfig::default());
        assert_eq!(state.refresh_tag(), state.identity().refresh_tag);
    }

    #[test]
    fn adopt_refresh_tag_replaces_current() {
        let state = ClientState::new(ClientConfig::default());
        let epoch = Uuid::new_v4();
        state.adopt_refresh_tag(epoch);
        assert_eq!(state.refresh_tag(), epoch);
        // The announced identity keeps the original tag.
        assert_ne!(state.identity().refresh_tag, epoch);
    }

    #[tokio::test]
    async fn send_queues_the_encoded_envelope() {
        let (ctx, mut rx) = make_context();
        ctx.send("say", json!({"text": "hi"})).await.unwrap();

        let raw = rx.recv().await.unwrap();
        let envelope = Envelope::decode(&raw).unwrap();
        assert_eq!(envelope.method, "say");
        assert_eq!(envelope.params["text"], "hi");
    }

    #[tokio::test]
    async fn send_after_session_end_is_channel_closed() {
        let (ctx, rx) = make_context();
        drop(rx);

        let err = ctx.send("say", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ChannelClosed));
    }
}
