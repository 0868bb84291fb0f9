//! Connector and session runtime.

use std::fmt;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use pulse_proto::protocol::CLIENT_REQUEST_CONNECT;
use pulse_proto::{Envelope, HandlerTable};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::context::{ClientContext, ClientState};
use crate::handlers::install_builtins;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Messages waiting for the writer task.
const OUTBOUND_BUFFER: usize = 64;

/// Errors raised while connecting or publishing.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket connection could not be established.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// The URL that was dialed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// A message could not be encoded for the wire.
    #[error(transparent)]
    Wire(#[from] pulse_proto::WireError),

    /// The session has ended and takes no more messages.
    #[error("session closed, message not sent")]
    ChannelClosed,
}

/// A bus client bound to one server.
///
/// Holds the minted identity and the dispatch table; [`connect`](Self::connect)
/// produces a live [`Session`] against the configured server.
pub struct BusClient {
    state: Arc<ClientState>,
    handlers: Arc<HandlerTable<ClientContext>>,
}

impl BusClient {
    /// Create a client with the given application handlers. The protocol
    /// built-ins install underneath them, so an application handler
    /// registered under a reserved method takes precedence.
    pub fn new(config: ClientConfig, mut handlers: HandlerTable<ClientContext>) -> Self {
        install_builtins(&mut handlers);
        Self {
            state: Arc::new(ClientState::new(config)),
            handlers: Arc::new(handlers),
        }
    }

    /// Shared client state: config, identity, adopted epoch.
    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    /// Open the WebSocket, start the writer task, and queue the connect
    /// announcement.
    ///
    /// The handshake completes while the returned session's
    /// [`run`](Session::run) loop processes the server's acceptance.
    pub async fn connect(&self) -> Result<Session, ClientError> {
        let url = self.state.config.ws_url();
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|source| ClientError::Connect {
                url: url.clone(),
                source,
            })?;
        debug!(%url, id = %self.state.id(), "connected to bus server");

        let (ws_tx, ws_rx) = ws.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let context = ClientContext::new(Arc::clone(&self.state), tx);
        let writer = tokio::spawn(write_outbound(ws_tx, rx));

        context
            .send(CLIENT_REQUEST_CONNECT, self.state.identity())
            .await?;

        Ok(Session {
            context,
            handlers: Arc::clone(&self.handlers),
            ws_rx,
            writer,
        })
    }
}

/// Drain queued messages into the socket. Frames leave in queue order; a
/// dead socket ends the task.
async fn write_outbound(mut ws_tx: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        if ws_tx.send(Message::text(text)).await.is_err() {
            break;
        }
    }
}

/// A connected session.
pub struct Session {
    context: ClientContext,
    handlers: Arc<HandlerTable<ClientContext>>,
    ws_rx: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// A send handle usable from other tasks while the session runs.
    pub fn context(&self) -> ClientContext {
        self.context.clone()
    }

    /// Read, decode, and dispatch inbound messages until the server closes
    /// the connection or the transport fails.
    pub async fn run(mut self) {
        while let Some(frame) = self.ws_rx.next().await {
            let text = match frame {
                Ok(Message::Text(ref text)) => text.to_string(),
                Ok(Message::Binary(ref data)) => match std::str::from_utf8(data) {
                    Ok(text) => text.to_string(),
                    Err(error) => {
                        debug!(%error, "non-UTF-8 binary frame, dropping");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(error) => {
                    debug!(%error, "transport error, closing session");
                    break;
                }
            };
            self.dispatch(&text).await;
        }
        debug!(id = %self.context.state.id(), "session closed");
        // Stop the writer and wait for it to release the queue, so sends
        // fail deterministically once `run` has returned.
        self.writer.abort();
        let _ = self.writer.await;
    }

    async fn dispatch(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(env) => env,
            Err(error) => {
                counter!("bus_decode_errors_total").increment(1);
                debug!(%error, "unparseable frame, dropping");
                return;
            }
        };
        trace!(method = %envelope.method, "frame received");
        let _ = self.handlers.dispatch(&self.context, &envelope).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
