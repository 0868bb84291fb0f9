//! Server assembly: HTTP routes, listener startup, and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use pulse_proto::HandlerTable;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::context::{ServerState, SessionContext};
use crate::handlers;
use crate::session::run_session;
use crate::sweeper::run_sweeper;

/// Errors surfaced while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The TCP listener could not be created or inspected.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The host:port that failed to bind.
        addr: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
}

#[derive(Clone)]
struct AppState {
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

/// The WebSocket message bus server.
pub struct BusServer {
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl BusServer {
    /// Build a server from configuration and application handlers.
    ///
    /// Protocol built-ins are installed behind the given handlers, so an
    /// application registration under a reserved method wins.
    pub fn new(config: ServerConfig, mut handlers: HandlerTable<SessionContext>) -> Self {
        handlers::install_builtins(&mut handlers);
        Self {
            state: Arc::new(ServerState::new(config, handlers)),
            cancel: CancellationToken::new(),
        }
    }

    /// The axum router serving `/ws` and `/health`.
    pub fn router(&self) -> Router {
        let app = AppState {
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
        };
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(app)
    }

    /// Bind the listener and start serving.
    ///
    /// Returns the bound address (meaningful with a configured port of 0)
    /// and the join handle of the serving task. When probing is enabled
    /// the liveness sweeper starts alongside. [`BusServer::shutdown`]
    /// stops the listener, every open session, and the sweeper; awaiting
    /// the handle then joins them.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let bind_addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: bind_addr,
                source,
            })?;
        self.state.set_advertised_port(addr.port());

        if self.state.config.probe.enabled {
            drop(tokio::spawn(run_sweeper(
                Arc::clone(&self.state),
                self.state.config.probe.interval(),
                self.cancel.child_token(),
            )));
        }

        info!(%addr, server = %self.state.identity().id, "bus server listening");
        let app = self.router();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(cancel.cancelled_owned());
            if let Err(error) = serve.await {
                error!(%error, "server task failed");
            }
        });
        Ok((addr, handle))
    }

    /// Broadcast an application message to every connected peer.
    pub async fn broadcast(&self, method: &str, params: impl Serialize + Send) {
        self.state.broadcaster.broadcast(method, params, None).await;
    }

    /// Shared server state.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Effective configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Begin a graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn ws_handler(State(app): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| run_session(socket, app.state, app.cancel))
}

async fn health_handler(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "clients": app.state.registry.num_clients().await,
    }))
}
