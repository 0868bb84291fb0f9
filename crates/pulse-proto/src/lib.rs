//! # pulse-proto
//!
//! Wire protocol for the pulse message bus: the `{method, params}` envelope,
//! the reserved liveness-protocol methods with their typed payloads, peer
//! identities, and the method-dispatch table shared by server and client.

#![deny(unsafe_code)]

pub mod dispatch;
pub mod envelope;
pub mod errors;
pub mod identity;
pub mod protocol;

pub use dispatch::{DispatchOutcome, HandlerTable, MethodHandler};
pub use envelope::Envelope;
pub use errors::WireError;
pub use identity::{ClientIdentity, ServerIdentity};
