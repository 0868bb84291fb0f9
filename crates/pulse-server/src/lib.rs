//! # pulse-server
//!
//! Server half of the pulse message bus: accepts WebSocket connections,
//! registers peers, fans messages out to every connected client, and runs
//! the periodic liveness sweep that evicts peers which stopped answering
//! probes.

#![deny(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod context;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod session;
pub mod sweeper;

pub use broadcast::Broadcaster;
pub use config::{ConfigError, ProbeConfig, ServerConfig};
pub use connection::PeerLink;
pub use context::{ServerState, SessionContext};
pub use registry::{PeerIdentity, PeerRegistry, SweepReport};
pub use server::{BusServer, ServerError};
