//! Built-in protocol handlers: acceptance, probe answers, announce silencing.

use async_trait::async_trait;
use metrics::counter;
use pulse_proto::protocol::{
    self, AcceptedConnect, CLIENT_RETURN_PROBE, ProbeChallenge, ProbeReply,
};
use pulse_proto::{Envelope, HandlerTable, MethodHandler};
use tracing::{debug, info, warn};

use crate::context::ClientContext;

/// Install the protocol built-ins into a handler table. An application
/// handler registered under the same method name takes precedence.
pub fn install_builtins(table: &mut HandlerTable<ClientContext>) {
    table.register_builtin(protocol::SERVER_ACCEPTED_CONNECT, AcceptedHandler);
    table.register_builtin(protocol::SERVER_PROBE, ProbeHandler);
    table.register_builtin(protocol::CLIENT_REQUEST_CONNECT, AnnounceSilencer);
}

/// Completes the handshake for acceptances addressed to this client.
pub struct AcceptedHandler;

#[async_trait]
impl MethodHandler<ClientContext> for AcceptedHandler {
    async fn handle(&self, ctx: &ClientContext, msg: &Envelope) {
        let accepted: AcceptedConnect = match msg.params_as() {
            Ok(a) => a,
            Err(error) => {
                counter!("bus_decode_errors_total").increment(1);
                debug!(%error, "malformed acceptance, ignoring");
                return;
            }
        };
        // Acceptances for other clients arrive on the same socket and are
        // dropped by the address filter.
        if accepted.send_to_uuid != ctx.state.id() {
            return;
        }
        ctx.state.adopt_refresh_tag(accepted.first_refresh_id);
        debug!(server = %accepted.id, "connection to bus server accepted");
        if ctx.state.config.list_mode {
            info!(
                server = %accepted.id,
                epoch = %accepted.first_refresh_id,
                port = accepted.port,
                num_clients = accepted.num_clients,
                "joined bus"
            );
        }

        // Echo the adopted epoch back so the first sweep sees this peer
        // as alive.
        let reply = ProbeReply {
            refresh_id: accepted.first_refresh_id,
            id: ctx.state.id(),
            server_id: accepted.id,
        };
        if let Err(error) = ctx.send(CLIENT_RETURN_PROBE, reply).await {
            warn!(%error, "could not acknowledge acceptance");
        }
    }
}

/// Answers liveness probes from this client's own server.
pub struct ProbeHandler;

#[async_trait]
impl MethodHandler<ClientContext> for ProbeHandler {
    async fn handle(&self, ctx: &ClientContext, msg: &Envelope) {
        let challenge: ProbeChallenge = match msg.params_as() {
            Ok(c) => c,
            Err(error) => {
                counter!("bus_decode_errors_total").increment(1);
                debug!(%error, "malformed probe, ignoring");
                return;
            }
        };
        // Probes relayed from other buses carry a foreign port; only the
        // configured server gets an answer.
        if challenge.port != ctx.state.config.port {
            return;
        }
        let reply = ProbeReply {
            refresh_id: challenge.refresh_id,
            id: ctx.state.id(),
            server_id: challenge.id,
        };
        if let Err(error) = ctx.send(CLIENT_RETURN_PROBE, reply).await {
            warn!(%error, "could not answer probe");
        }
    }
}

/// Swallows announce traffic relayed from other clients, which would
/// otherwise show up as an unknown method.
pub struct AnnounceSilencer;

#[async_trait]
impl MethodHandler<ClientContext> for AnnounceSilencer {
    async fn handle(&self, _ctx: &ClientContext, _msg: &Envelope) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::config::ClientConfig;
    use crate::context::ClientState;

    fn make_context() -> (ClientContext, mpsc::Receiver<String>) {
        let state = Arc::new(ClientState::new(ClientConfig::default()));
        let (tx, rx) = mpsc::channel(8);
        (ClientContext::new(state, tx), rx)
    }

    fn acceptance_for(ctx: &ClientContext) -> AcceptedConnect {
        AcceptedConnect {
            id: Uuid::new_v4(),
            port: ctx.state.config.port,
            num_clients: 1,
            send_to_uuid: ctx.state.id(),
            first_refresh_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn acceptance_adopts_epoch_and_acknowledges() {
        let (ctx, mut rx) = make_context();
        let accepted = acceptance_for(&ctx);
        let envelope = Envelope::new(protocol::SERVER_ACCEPTED_CONNECT, &accepted).unwrap();

        AcceptedHandler.handle(&ctx, &envelope).await;

        assert_eq!(ctx.state.refresh_tag(), accepted.first_refresh_id);

        let raw = rx.try_recv().unwrap();
        let reply_env = Envelope::decode(&raw).unwrap();
        assert_eq!(reply_env.method, CLIENT_RETURN_PROBE);
        let reply: ProbeReply = reply_env.params_as().unwrap();
        assert_eq!(reply.refresh_id, accepted.first_refresh_id);
        assert_eq!(reply.id, ctx.state.id());
        assert_eq!(reply.server_id, accepted.id);
    }

    #[tokio::test]
    async fn acceptance_for_another_client_is_dropped() {
        let (ctx, mut rx) = make_context();
        let mut accepted = acceptance_for(&ctx);
        accepted.send_to_uuid = Uuid::new_v4();
        let envelope = Envelope::new(protocol::SERVER_ACCEPTED_CONNECT, &accepted).unwrap();

        AcceptedHandler.handle(&ctx, &envelope).await;

        assert_ne!(ctx.state.refresh_tag(), accepted.first_refresh_id);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_acceptance_is_ignored() {
        let (ctx, mut rx) = make_context();
        let before = ctx.state.refresh_tag();
        let envelope =
            Envelope::new(protocol::SERVER_ACCEPTED_CONNECT, json!({"id": 17})).unwrap();

        AcceptedHandler.handle(&ctx, &envelope).await;

        assert_eq!(ctx.state.refresh_tag(), before);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn probe_for_own_server_is_answered() {
        let (ctx, mut rx) = make_context();
        let challenge = ProbeChallenge {
            refresh_id: Uuid::new_v4(),
            id: Uuid::new_v4(),
            port: ctx.state.config.port,
        };
        let envelope = Envelope::new(protocol::SERVER_PROBE, &challenge).unwrap();

        ProbeHandler.handle(&ctx, &envelope).await;

        let raw = rx.try_recv().unwrap();
        let reply: ProbeReply = Envelope::decode(&raw).unwrap().params_as().unwrap();
        assert_eq!(reply.refresh_id, challenge.refresh_id);
        assert_eq!(reply.id, ctx.state.id());
        assert_eq!(reply.server_id, challenge.id);
    }

    #[tokio::test]
    async fn probe_does_not_touch_adopted_epoch() {
        let (ctx, _rx) = make_context();
        let before = ctx.state.refresh_tag();
        let challenge = ProbeChallenge {
            refresh_id: Uuid::new_v4(),
            id: Uuid::new_v4(),
            port: ctx.state.config.port,
        };
        let envelope = Envelope::new(protocol::SERVER_PROBE, &challenge).unwrap();

        ProbeHandler.handle(&ctx, &envelope).await;

        assert_eq!(ctx.state.refresh_tag(), before);
    }

    #[tokio::test]
    async fn probe_for_foreign_port_is_dropped() {
        let (ctx, mut rx) = make_context();
        let challenge = ProbeChallenge {
            refresh_id: Uuid::new_v4(),
            id: Uuid::new_v4(),
            port: ctx.state.config.port + 1,
        };
        let envelope = Envelope::new(protocol::SERVER_PROBE, &challenge).unwrap();

        ProbeHandler.handle(&ctx, &envelope).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_probe_is_ignored() {
        let (ctx, mut rx) = make_context();
        let envelope = Envelope::new(protocol::SERVER_PROBE, json!({"port": "nope"})).unwrap();

        ProbeHandler.handle(&ctx, &envelope).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn relayed_announce_is_silenced() {
        let mut table = HandlerTable::new();
        install_builtins(&mut table);
        let (ctx, mut rx) = make_context();
        let envelope = Envelope::new(
            protocol::CLIENT_REQUEST_CONNECT,
            json!({"id": Uuid::new_v4().to_string()}),
        )
        .unwrap();

        let outcome = table.dispatch(&ctx, &envelope).await;

        assert_eq!(outcome, pulse_proto::DispatchOutcome::Builtin);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn install_builtins_covers_inbound_protocol_methods() {
        let mut table: HandlerTable<ClientContext> = HandlerTable::new();
        install_builtins(&mut table);
        assert!(table.has_method(protocol::SERVER_ACCEPTED_CONNECT));
        assert!(table.has_method(protocol::SERVER_PROBE));
        assert!(table.has_method(protocol::CLIENT_REQUEST_CONNECT));
    }
}
