//! The `{method, params}` envelope every bus message travels in.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WireError;

/// A decoded bus message.
///
/// `method` selects the handler; `params` is an arbitrary structured value
/// owned by that method. There is no envelope versioning and no message id
/// beyond what individual methods embed in their params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Handler name this message is addressed to.
    pub method: String,
    /// Method-owned payload. Frames without a `params` key decode as null.
    #[serde(default)]
    pub params: Value,
}

impl Envelope {
    /// Build an envelope from a method name and a serializable payload.
    pub fn new(method: impl Into<String>, params: impl Serialize) -> Result<Self, WireError> {
        Ok(Self {
            method: method.into(),
            params: serde_json::to_value(params).map_err(WireError::Encode)?,
        })
    }

    /// Decode a text frame.
    pub fn decode(raw: &str) -> Result<Self, WireError> {
        serde_json::from_str(raw).map_err(WireError::Decode)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Deserialize `params` into the typed payload a method expects.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        serde_json::from_value(self.params.clone()).map_err(WireError::Params)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
