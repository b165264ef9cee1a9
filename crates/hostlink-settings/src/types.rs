//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the fields it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000, "basePath": "/mcp" },
///   "host": { "tickIntervalMs": 8 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostlinkSettings {
    pub server: ServerSettings,
    pub host: HostSettings,
    pub logging: LoggingSettings,
}

impl HostlinkSettings {
    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        let base = &self.server.base_path;
        if !base.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.basePath must start with '/': {base}"
            )));
        }
        if base.len() > 1 && base.ends_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.basePath must not end with '/': {base}"
            )));
        }
        if self.server.keep_alive_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.keepAliveSecs must be at least 1".into(),
            ));
        }
        if self.host.tick_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "host.tickIntervalMs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Prefix for the session routes (`{basePath}/sse`, `{basePath}/message`).
    pub base_path: String,
    /// Name reported in the `initialize` handshake.
    pub server_name: String,
    /// Version reported in the `initialize` handshake.
    pub server_version: String,
    /// Interval between keep-alive comments on an idle stream.
    pub keep_alive_secs: u64,
    /// Buffered outbound frames per session before writes wait.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            base_path: "/api".to_string(),
            server_name: "hostlink".to_string(),
            server_version: "0.1.0".to_string(),
            keep_alive_secs: 15,
            outbound_buffer: 64,
        }
    }
}

/// Host thread settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    /// Sleep between drains of the host queue.
    pub tick_interval_ms: u64,
    /// Maximum pending host work items. `0` means unbounded.
    pub queue_capacity: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            queue_capacity: 0,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Per-module overrides, e.g. `{"hostlink_server": "debug"}`.
    pub modules: BTreeMap<String, String>,
    /// Emit JSON lines.
    pub json: bool,
    /// Forward events to the host console on each tick.
    pub host_console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            json: false,
            host_console: true,
        }
    }
}
