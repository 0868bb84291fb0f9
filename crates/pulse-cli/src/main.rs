//! # pulse-cli
//!
//! Command line for the pulse message bus. `pulse serve` runs a bus server
//! until interrupted; `pulse join` attaches to a running bus as a peer.
//! Both sides register the same demo handlers, so two terminals are enough
//! to watch messages flow across the bus.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use pulse_client::{BusClient, ClientConfig, ClientContext};
use pulse_proto::{Envelope, HandlerTable, MethodHandler};
use pulse_server::{BusServer, ServerConfig};
use tracing_subscriber::EnvFilter;

/// pulse message bus.
#[derive(Parser, Debug)]
#[command(name = "pulse", about = "WebSocket message bus server and client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run a bus server until interrupted.
    Serve(ServeArgs),
    /// Join a running bus as a peer.
    Join(JoinArgs),
}

/// Flags for `pulse serve`. Unset flags defer to the config file and
/// environment.
#[derive(Args, Debug)]
struct ServeArgs {
    /// Interface to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose lifecycle logging.
    #[arg(long)]
    debug: bool,

    /// Log a registry snapshot whenever the peer set changes.
    #[arg(long)]
    list: bool,

    /// Rebroadcast application messages to the other peers.
    #[arg(long)]
    broadcastable: bool,

    /// Run the periodic liveness sweep.
    #[arg(long)]
    probe: bool,

    /// Seconds between liveness sweeps.
    #[arg(long)]
    probe_interval: Option<u64>,

    /// Broadcast a demo `say` message every N seconds.
    #[arg(long)]
    say_every: Option<u64>,
}

impl ServeArgs {
    /// Resolve the effective server configuration: config file (or
    /// defaults plus environment), then flags on top.
    fn resolve(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => {
                let mut config = ServerConfig::default();
                config.apply_env_overrides();
                config
            }
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.debug {
            config.debug = true;
        }
        if self.list {
            config.list_mode = true;
        }
        if self.broadcastable {
            config.broadcastable = true;
        }
        if self.probe {
            config.probe.enabled = true;
        }
        if let Some(secs) = self.probe_interval {
            config.probe.interval_secs = secs;
        }
        Ok(config)
    }
}

/// Flags for `pulse join`.
#[derive(Args, Debug)]
struct JoinArgs {
    /// Host of the bus server.
    #[arg(long)]
    host: Option<String>,

    /// Port of the bus server.
    #[arg(long)]
    port: Option<u16>,

    /// Verbose lifecycle logging.
    #[arg(long)]
    debug: bool,

    /// Log a connection summary once the server accepts.
    #[arg(long)]
    list: bool,

    /// Publish a demo `say` message every N seconds.
    #[arg(long)]
    say_every: Option<u64>,
}

impl JoinArgs {
    /// Resolve the effective client configuration from defaults plus flags.
    fn resolve(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.debug {
            config.debug = true;
        }
        if self.list {
            config.list_mode = true;
        }
        config
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows `--debug`. Logs go
/// to stderr so demo handler output on stdout stays readable.
fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let _ = subscriber.try_init();
}

/// Prints the text of a demo `say` message.
struct SayHandler;

#[async_trait]
impl<C: Send + Sync> MethodHandler<C> for SayHandler {
    async fn handle(&self, _ctx: &C, msg: &Envelope) {
        if let Some(text) = msg.params["text"].as_str() {
            println!("{text}");
        }
    }
}

/// Pretends to restyle a UI on a demo `set-background-color` message.
struct BackgroundHandler {
    side: &'static str,
}

#[async_trait]
impl<C: Send + Sync> MethodHandler<C> for BackgroundHandler {
    async fn handle(&self, _ctx: &C, msg: &Envelope) {
        if let Some(color) = msg.params["color"].as_str() {
            println!("[{}] set background color to {color}", self.side);
        }
    }
}

/// Demo handler table shared by both subcommands.
fn demo_handlers<C: Send + Sync + 'static>(side: &'static str) -> HandlerTable<C> {
    let mut table = HandlerTable::new();
    table.register("say", SayHandler);
    table.register("set-background-color", BackgroundHandler { side });
    table
}

/// Broadcast a demo `say` message on a fixed cadence.
async fn periodic_say_server(server: Arc<BusServer>, secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    let _ = interval.tick().await;
    loop {
        let _ = interval.tick().await;
        let message = serde_json::json!({ "text": "scheduled hello from the bus server" });
        server.broadcast("say", message).await;
    }
}

/// Publish a demo `say` message on a fixed cadence until the session ends.
async fn periodic_say_client(context: ClientContext, secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    let _ = interval.tick().await;
    loop {
        let _ = interval.tick().await;
        let message = serde_json::json!({ "text": "scheduled hello from a bus peer" });
        if context.send("say", message).await.is_err() {
            break;
        }
    }
}

/// Run a bus server until ctrl-c.
async fn serve(args: &ServeArgs) -> Result<()> {
    let config = args.resolve()?;
    init_subscriber(if config.debug { "debug" } else { "info" });

    let server = Arc::new(BusServer::new(config, demo_handlers("server")));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("pulse bus listening on ws://{addr}/ws");

    if let Some(secs) = args.say_every {
        let _say_handle = tokio::spawn(periodic_say_server(Arc::clone(&server), secs));
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown();
    let _ = handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Join a running bus until the connection drops or ctrl-c.
async fn join(args: &JoinArgs) -> Result<()> {
    let config = args.resolve();
    init_subscriber(if config.debug { "debug" } else { "info" });

    let url = config.ws_url();
    let client = BusClient::new(config, demo_handlers("client"));
    let session = client
        .connect()
        .await
        .context("Failed to reach bus server")?;
    tracing::info!("connected to {url}");
    let context = session.context();

    if let Some(secs) = args.say_every {
        let _say_handle = tokio::spawn(periodic_say_client(context, secs));
    }

    // Run until the server closes the connection or a shutdown signal lands.
    tokio::select! {
        () = session.run() => tracing::info!("server closed the connection"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            tracing::info!("disconnecting");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(&args).await,
        Command::Join(args) => join(&args).await,
    }
}
