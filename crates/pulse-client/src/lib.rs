//! Client half of the pulse message bus.
//!
//! [`BusClient`] dials a bus server over WebSocket, announces a freshly
//! minted identity, and returns a [`Session`] whose `run()` drives the
//! inbound read-decode-dispatch loop. Application handlers share the
//! dispatch table with the protocol built-ins (acceptance, probe answers),
//! which install automatically; the cloneable [`ClientContext`] lets other
//! tasks publish while the session runs.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod context;
pub mod handlers;

pub use client::{BusClient, ClientError, Session};
pub use config::ClientConfig;
pub use context::{ClientContext, ClientState};
