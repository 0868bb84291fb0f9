//! Server configuration: file loading and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a config file exists at the given path, parse it (missing keys
//!    keep their defaults)
//! 3. Apply environment variable overrides (highest priority)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors raised while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file exists but is not valid JSON for [`ServerConfig`].
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface the WebSocket listener binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the WebSocket listener binds to. Port 0 asks the OS for a
    /// free port; the bound port is advertised in protocol messages.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Verbose lifecycle logging.
    #[serde(default)]
    pub debug: bool,

    /// Log a registry snapshot whenever the peer set changes.
    #[serde(default)]
    pub list_mode: bool,

    /// Rebroadcast every non-protocol inbound message to the other peers.
    #[serde(default)]
    pub broadcastable: bool,

    /// Liveness probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Settings for the periodic liveness sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Whether the sweeper runs at all.
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between sweeps. Each sweep evicts peers that missed the
    /// previous probe, then issues a fresh one.
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
}

impl ProbeConfig {
    /// The sweep interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            list_mode: false,
            broadcastable: false,
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_probe_interval(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_probe_interval() -> u64 {
    10
}

impl ServerConfig {
    /// Load configuration from a specific path with env var overrides.
    ///
    /// If the file does not exist, returns defaults. If the file contains
    /// invalid JSON, returns an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            debug!(?path, "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to loaded configuration.
    ///
    /// Each env var has strict parsing rules:
    /// - Integers must be valid and within the specified range
    /// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
    /// - Invalid values are ignored with a warning (fall back to file/default)
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("PULSE_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_u16("PULSE_PORT", 1, 65535) {
            self.port = v;
        }
        if let Some(v) = read_env_bool("PULSE_DEBUG") {
            self.debug = v;
        }
        if let Some(v) = read_env_bool("PULSE_LIST_MODE") {
            self.list_mode = v;
        }
        if let Some(v) = read_env_bool("PULSE_BROADCASTABLE") {
            self.broadcastable = v;
        }
        if let Some(v) = read_env_bool("PULSE_PROBE") {
            self.probe.enabled = v;
        }
        if let Some(v) = read_env_u64("PULSE_PROBE_INTERVAL", 1, 86_400) {
            self.probe.interval_secs = v;
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
