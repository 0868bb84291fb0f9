//! Client configuration.

use serde::{Deserialize, Serialize};

/// Settings for a bus client.
///
/// `host` and `port` name the server being dialed. They are also announced
/// in the connect handshake, and the port doubles as the filter for
/// incoming probes: challenges stamped with any other port are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host to dial.
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port to dial.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Verbose protocol logging.
    #[serde(default)]
    pub debug: bool,

    /// Log the server's info block on acceptance.
    #[serde(default)]
    pub list_mode: bool,
}

impl ClientConfig {
    /// The WebSocket URL this configuration dials.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/ws", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            list_mode: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(!config.debug);
        assert!(!config.list_mode);
    }

    #[test]
    fn ws_url_formats_host_and_port() {
        let config = ClientConfig {
            host: "bus.internal".into(),
            port: 9100,
            ..ClientConfig::default()
        };
        assert_eq!(config.ws_url(), "ws://bus.internal:9100/ws");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"port": 4000}"#).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4000);
        assert!(!config.debug);
    }

    #[test]
    fn empty_json_is_all_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
    }
}
