//! Wire-level error types.

use thiserror::Error;

/// Errors arising while encoding or decoding bus messages.
///
/// None of these are fatal to a connection: malformed input is logged and
/// dropped, and the stream keeps flowing.
#[derive(Debug, Error)]
pub enum WireError {
    /// The raw frame is not a well-formed message.
    #[error("malformed wire payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// A message could not be serialized for the wire.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The params payload does not match the shape the method expects.
    #[error("invalid params: {0}")]
    Params(#[source] serde_json::Error),
}
