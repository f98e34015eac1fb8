//! Configuration schema definitions.
//!
//! This module defines the configuration document for a service's server
//! set. All types derive Serde traits for deserialization from config files.
//! Durations are kept as strings and parsed where they are applied, so a bad
//! value falls back to its default instead of rejecting the whole file.

use serde::{Deserialize, Serialize};

/// Root configuration for a service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub logging: LoggingConfig,

    /// Servers, health checks and metrics endpoints.
    pub server_config: ServersConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The server set owned by one listener.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServersConfig {
    /// API servers.
    pub servers: Vec<ServerEntry>,

    /// Liveness/readiness endpoints.
    pub health_check_servers: Vec<ServerEntry>,

    /// Profiling endpoints. Only `pprof` is recognised.
    pub metrics_servers: Vec<ServerEntry>,

    /// Names started first, in order.
    pub startup_strategy: Vec<String>,

    /// Names stopped first, in order.
    pub shutdown_strategy: Vec<String>,

    /// Bound on a full shutdown (e.g. "30s").
    pub full_shutdown_duration: String,

    pub tls: TlsConfig,
}

impl ServersConfig {
    /// Every configured server entry across the three lists.
    pub fn all_entries(&self) -> impl Iterator<Item = &ServerEntry> {
        self.servers
            .iter()
            .chain(&self.health_check_servers)
            .chain(&self.metrics_servers)
    }
}

/// One server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerEntry {
    /// Unique identifier used by the startup and shutdown strategies.
    pub name: String,

    /// `REST`/`HTTP`, `GRPC` or `GraphQL`/`GQL`, case-insensitive.
    pub mode: String,

    /// `tcp` (default) or `unix`.
    pub network: String,

    /// Bind host. Empty binds all interfaces.
    pub host: String,

    pub port: u16,

    /// Socket file for the `unix` network.
    pub socket_path: String,

    /// Relisten after an unrequested stop. Defaults to on.
    pub restart: Option<bool>,

    /// Health-check path.
    pub path: String,

    /// Wait between draining and closing (e.g. "3s").
    pub probe_wait_time: String,

    pub http: HttpConfig,

    pub grpc: GrpcConfig,
}

/// Timeouts for request/response and query-language servers.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HttpConfig {
    pub shutdown_duration: String,
    pub handler_timeout: String,
    pub read_header_timeout: String,
    pub read_timeout: String,
    pub write_timeout: String,
    pub idle_timeout: String,
}

/// Transport settings for RPC servers.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GrpcConfig {
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub initial_conn_window_size: Option<u32>,
    pub keepalive: KeepaliveConfig,
    pub connection_timeout: String,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,

    /// Per-service message limits in bytes, applied by the service's
    /// registration (tonic sets them on each generated server).
    pub max_receive_message_size: Option<usize>,
    pub max_send_message_size: Option<usize>,

    /// Interceptor names, e.g. `RecoverInterceptor`.
    pub interceptors: Vec<String>,
}

/// HTTP/2 keepalive for RPC servers.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub time: String,
    pub timeout: String,
    /// Connections older than this are drained and closed.
    pub max_conn_age: String,
}

/// TLS configuration shared by every server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,

    /// Path to certificate file (PEM).
    pub cert: String,

    /// Path to private key file (PEM).
    pub key: String,
}
