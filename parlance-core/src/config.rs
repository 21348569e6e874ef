//! Client configuration surface.
//!
//! Everything is serde-friendly so host applications can load it from a
//! JSON/TOML file and pass it straight to [`SessionManager`].
//!
//! [`SessionManager`]: crate::session::SessionManager

use serde::{Deserialize, Serialize};

/// Top-level configuration for a conversation client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// Feature flags sent to the service during session open.
    pub capabilities: Capabilities,
    pub history: HistoryConfig,
}

/// Socket/reconnect behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ConnectionConfig {
    /// When enabled (default), a dropped socket is reopened automatically on
    /// the next `send()`. When disabled the host must call `open_manually()`.
    pub auto_reconnect: bool,
    pub gateway: Gateway,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            gateway: Gateway::default(),
        }
    }
}

/// Service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Gateway {
    pub hostname: String,
    /// Use TLS (`wss://`) when connecting. Default: true.
    pub ssl: bool,
}

impl Default for Gateway {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            ssl: true,
        }
    }
}

/// Feature flags negotiated during session open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Capabilities {
    pub audio: bool,
    pub interruptions: bool,
    pub emotions: bool,
    pub phoneme_info: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            audio: true,
            interruptions: true,
            emotions: false,
            phoneme_info: false,
        }
    }
}

/// History behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct HistoryConfig {
    /// Replay scene-embedded history into the local projection on open.
    pub previous_state: bool,
}
