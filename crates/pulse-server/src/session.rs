//! Per-connection session loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use pulse_proto::{Envelope, protocol};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::connection::PeerLink;
use crate::context::{ServerState, SessionContext};

/// Channel depth between dispatch and the socket write task.
const OUTBOUND_BUFFER: usize = 1024;

/// Drive one WebSocket connection until it closes, errors, or the
/// server shuts down.
pub async fn run_session(socket: WebSocket, state: Arc<ServerState>, cancel: CancellationToken) {
    let conn_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(OUTBOUND_BUFFER);
    let link = Arc::new(PeerLink::new(conn_id, tx));
    state.registry.attach(Arc::clone(&link)).await;
    counter!("bus_connections_total").increment(1);
    debug!(conn = %conn_id, "connection open");

    // Write task: drains the outbound queue onto the socket. Queued
    // frames go out in order; a dead socket ends the task.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(message)) => {
                        let text = match message {
                            Message::Text(ref t) => Some(t.to_string()),
                            Message::Binary(ref data) => match std::str::from_utf8(data) {
                                Ok(s) => Some(s.to_string()),
                                Err(_) => {
                                    debug!(conn = %conn_id, len = data.len(), "ignoring non-UTF8 binary frame");
                                    None
                                }
                            },
                            Message::Close(_) => break,
                            Message::Ping(_) | Message::Pong(_) => None,
                        };
                        if let Some(text) = text {
                            handle_frame(&text, &state, &link).await;
                        }
                    }
                    Some(Err(error)) => {
                        debug!(conn = %conn_id, %error, "connection error");
                        break;
                    }
                    None => break,
                }
            }
            () = cancel.cancelled() => {
                debug!(conn = %conn_id, "server shutting down, closing connection");
                break;
            }
        }
    }

    // Single removal path: the link and any identities registered
    // through it leave the registry together.
    let released = state.registry.detach(conn_id).await;
    if !released.is_empty() {
        debug!(conn = %conn_id, peers = released.len(), "peer registrations released");
        if state.config.list_mode {
            state.registry.log_snapshot().await;
        }
    }
    debug!(conn = %conn_id, age = ?link.age(), dropped = link.drop_count(), "connection closed");
    counter!("bus_disconnections_total").increment(1);
    writer.abort();
}

/// Decode one text frame, dispatch it, and rebroadcast it when the
/// server relays application traffic.
async fn handle_frame(text: &str, state: &Arc<ServerState>, link: &Arc<PeerLink>) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            counter!("bus_decode_errors_total").increment(1);
            debug!(%error, "unparseable frame, dropping");
            return;
        }
    };
    trace!(method = %envelope.method, "frame received");
    let ctx = SessionContext {
        state: Arc::clone(state),
        link: Arc::clone(link),
    };
    let _ = state.handlers.dispatch(&ctx, &envelope).await;

    // Relay mode: application messages fan out to the other peers.
    // Protocol messages never relay.
    if state.config.broadcastable && !protocol::is_reserved(&envelope.method) {
        state
            .broadcaster
            .broadcast(&envelope.method, envelope.params, Some(link.conn_id()))
            .await;
    }
}
