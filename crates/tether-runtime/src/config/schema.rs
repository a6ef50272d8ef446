//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_transport::{DEFAULT_WS_PATH, ManagerConfig};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Listening endpoint.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session tuning.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Outbound call settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Bot behaviour.
    #[serde(default)]
    pub bot: BotConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TetherConfig {
    /// Checks the loaded values; see [`validate_config`](super::validate_config).
    pub fn validate(&self) -> super::ConfigResult<()> {
        super::validate_config(self)
    }
}

// =============================================================================
// Server
// =============================================================================

/// Reverse WebSocket server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the upgrade endpoint.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Token the connecting implementation must present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            access_token: None,
        }
    }
}

impl ServerConfig {
    /// `host:port`, suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12001
}

fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}

// =============================================================================
// Connection
// =============================================================================

/// Connection manager tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Capacity of the outbound frame queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval between pings, in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Receive-side silence that ends a session, in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Deadline for a single write, in seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Time a replaced session gets to wind down, in milliseconds.
    #[serde(default = "default_replace_grace")]
    pub replace_grace_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            replace_grace_ms: default_replace_grace(),
        }
    }
}

impl ConnectionConfig {
    /// Converts to the transport's config.
    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            queue_capacity: self.queue_capacity,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            replace_grace: Duration::from_millis(self.replace_grace_ms),
        }
    }
}

fn default_queue_capacity() -> usize {
    100
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

fn default_replace_grace() -> u64 {
    500
}

// =============================================================================
// API / Bot
// =============================================================================

/// Outbound call configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Time to wait for a reply, in seconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_api_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Users allowed through the superuser permission.
    #[serde(default)]
    pub superusers: Vec<i64>,

    /// Whether command rules built by the app compare case-sensitively.
    #[serde(default)]
    pub command_case_sensitive: bool,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output layout of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Needs the `json-log` feature; falls back to [`LogFormat::Full`] without it.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output` is `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Per-target levels, e.g. `tether_transport = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of each event.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = TetherConfig::default();

        assert_eq!(config.server.bind_addr(), "0.0.0.0:12001");
        assert_eq!(config.server.ws_path, "/onebot/v11/ws");
        assert_eq!(config.api.timeout(), Duration::from_secs(10));

        let manager = config.connection.to_manager_config();
        assert_eq!(manager.queue_capacity, 100);
        assert_eq!(manager.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(manager.read_timeout, Duration::from_secs(60));
        assert_eq!(manager.write_timeout, Duration::from_secs(10));
        assert_eq!(manager.replace_grace, Duration::from_millis(500));
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let config: TetherConfig = serde_json::from_value(serde_json::json!({
            "server": { "port": 8080 },
            "logging": { "level": "debug", "filters": { "tether_transport": "trace" } },
        }))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.filters["tether_transport"], LogLevel::Trace);
        assert_eq!(config.connection, ConnectionConfig::default());
    }
}
