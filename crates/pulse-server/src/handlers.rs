//! Built-in protocol handlers: connect registration and probe answers.

use async_trait::async_trait;
use metrics::counter;
use pulse_proto::protocol::{self, AcceptedConnect, ProbeReply, SERVER_ACCEPTED_CONNECT};
use pulse_proto::{ClientIdentity, Envelope, HandlerTable, MethodHandler};
use tracing::{debug, trace};

use crate::context::SessionContext;
use crate::registry::PeerIdentity;

/// Install the protocol built-ins into a handler table. An application
/// handler registered under the same method name takes precedence.
pub fn install_builtins(table: &mut HandlerTable<SessionContext>) {
    table.register_builtin(protocol::CLIENT_REQUEST_CONNECT, ConnectHandler);
    table.register_builtin(protocol::CLIENT_RETURN_PROBE, ProbeReplyHandler);
}

/// Registers an announcing peer and broadcasts the acceptance.
pub struct ConnectHandler;

#[async_trait]
impl MethodHandler<SessionContext> for ConnectHandler {
    async fn handle(&self, ctx: &SessionContext, msg: &Envelope) {
        let announcement: ClientIdentity = match msg.params_as() {
            Ok(a) => a,
            Err(error) => {
                counter!("bus_decode_errors_total").increment(1);
                debug!(%error, "malformed connect announcement, ignoring");
                return;
            }
        };
        ctx.link.bind_peer(announcement.id);
        let num_clients = ctx
            .state
            .registry
            .register(PeerIdentity::from_announcement(&announcement))
            .await;
        debug!(peer = %announcement.id, num_clients, "client connected");
        if ctx.state.config.list_mode {
            ctx.state.registry.log_snapshot().await;
        }

        // The acceptance goes to every connection; non-addressed peers
        // drop it by the `sendToUUID` field.
        let identity = ctx.state.identity();
        let accepted = AcceptedConnect {
            id: identity.id,
            port: identity.port,
            num_clients,
            send_to_uuid: announcement.id,
            first_refresh_id: ctx.state.registry.current_epoch().await,
        };
        ctx.state
            .broadcaster
            .broadcast(SERVER_ACCEPTED_CONNECT, accepted, None)
            .await;
    }
}

/// Records a liveness answer against the answering peer.
pub struct ProbeReplyHandler;

#[async_trait]
impl MethodHandler<SessionContext> for ProbeReplyHandler {
    async fn handle(&self, ctx: &SessionContext, msg: &Envelope) {
        let reply: ProbeReply = match msg.params_as() {
            Ok(r) => r,
            Err(error) => {
                counter!("bus_decode_errors_total").increment(1);
                debug!(%error, "malformed probe reply, ignoring");
                return;
            }
        };
        // The stamped tag is the server's current epoch, not the echoed
        // one. A reply for an unknown peer changes nothing.
        let epoch = ctx.state.registry.current_epoch().await;
        if ctx.state.registry.update_refresh_tag(reply.id, epoch).await {
            trace!(peer = %reply.id, "probe answered");
        }
    }
}
