//! Wiring from configuration to a ready [`Listener`].
//!
//! # Responsibilities
//! - Build one server per configured API entry, asking the owning service
//!   for the handler or registration callback of its mode
//! - Add health-check servers and the `pprof` metrics server
//! - Attach per-server lifecycle hooks and the shared TLS context
//! - Apply the startup/shutdown strategies and full shutdown duration
//!
//! # Data Flow
//! ```text
//! ServersConfig + handler factories + hooks
//!     → setup_health_check / setup_apis / setup_metrics (Server::new each)
//!     → Listener::builder().with_server(..)
//!     → Listener
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;

use crate::config::duration::parse_or;
use crate::config::schema::{ServerEntry, ServersConfig};
use crate::error::{Error, Result};
use crate::lifecycle::{Listener, DEFAULT_FULL_SHUTDOWN_DURATION};
use crate::net::tls::{load_tls_config, SecurityContext};
use crate::observability::metrics;
use crate::server::options::DEFAULT_SHUTDOWN_DURATION;
use crate::server::{
    Bind, GrpcSettings, Hook, HttpOptions, HttpTimeouts, Interceptors, Mode, Protocol, Registration, RpcOptions,
    Server, ServerConfig,
};

/// Name of the only recognised metrics server.
pub const PPROF_SERVER: &str = "pprof";

type RouterFactory = Box<dyn Fn(&ServerEntry) -> Router + Send + Sync>;
type RegistrationFactory = Box<dyn Fn(&ServerEntry) -> Registration + Send + Sync>;

/// Builds a [`Listener`] from a [`ServersConfig`].
pub struct Starter {
    config: ServersConfig,
    tls: Option<SecurityContext>,
    rest: Option<RouterFactory>,
    grpc: Option<RegistrationFactory>,
    graphql: Option<RouterFactory>,
    pre_start: HashMap<String, Hook>,
    pre_stop: HashMap<String, Hook>,
}

impl Starter {
    pub fn new(config: ServersConfig) -> Self {
        Self {
            config,
            tls: None,
            rest: None,
            grpc: None,
            graphql: None,
            pre_start: HashMap::new(),
            pre_stop: HashMap::new(),
        }
    }

    /// Use this TLS context instead of loading the configured files.
    pub fn with_tls(mut self, tls: SecurityContext) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Handler for request/response servers.
    pub fn with_rest<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServerEntry) -> Router + Send + Sync + 'static,
    {
        self.rest = Some(Box::new(f));
        self
    }

    /// Registration callback for RPC servers.
    pub fn with_grpc<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServerEntry) -> Registration + Send + Sync + 'static,
    {
        self.grpc = Some(Box::new(f));
        self
    }

    /// Handler for query-language servers.
    pub fn with_graphql<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServerEntry) -> Router + Send + Sync + 'static,
    {
        self.graphql = Some(Box::new(f));
        self
    }

    pub fn with_pre_start(mut self, server: impl Into<String>, hook: Hook) -> Self {
        self.pre_start.insert(server.into(), hook);
        self
    }

    pub fn with_pre_stop(mut self, server: impl Into<String>, hook: Hook) -> Self {
        self.pre_stop.insert(server.into(), hook);
        self
    }

    /// Build every configured server and register them in one listener.
    pub async fn build(mut self) -> Result<Listener> {
        if self.tls.is_none() && self.config.tls.enabled {
            let tls = &self.config.tls;
            let context = load_tls_config(Path::new(&tls.cert), Path::new(&tls.key))
                .await
                .map_err(Error::Tls)?;
            self.tls = Some(context);
        }

        let mut servers = self.setup_health_check()?;
        servers.extend(self.setup_apis()?);
        servers.extend(self.setup_metrics()?);

        let full_shutdown = parse_or(&self.config.full_shutdown_duration, DEFAULT_FULL_SHUTDOWN_DURATION);
        tracing::info!(servers = servers.len(), full_shutdown = ?full_shutdown, "Server set configured");

        Ok(Listener::builder()
            .with_servers(servers)
            .with_startup_order(self.config.startup_strategy.iter().cloned())
            .with_shutdown_order(self.config.shutdown_strategy.iter().cloned())
            .with_shutdown_duration(full_shutdown)
            .build())
    }

    fn setup_apis(&self) -> Result<Vec<Server>> {
        self.config
            .servers
            .iter()
            .map(|entry| {
                let mode = parse_mode(entry, None)?;
                let protocol = match mode {
                    Mode::RequestResponse => Protocol::RequestResponse(HttpOptions {
                        handler: self.rest.as_ref().map(|f| f(entry)),
                        timeouts: http_timeouts(entry),
                    }),
                    Mode::QueryLanguage => Protocol::QueryLanguage(HttpOptions {
                        handler: self.graphql.as_ref().map(|f| f(entry)),
                        timeouts: http_timeouts(entry),
                    }),
                    Mode::Rpc => Protocol::Rpc(RpcOptions {
                        registration: self.grpc.as_ref().map(|f| f(entry)),
                        settings: grpc_settings(entry),
                    }),
                };
                Server::new(self.server_config(entry, protocol)?)
            })
            .collect()
    }

    fn setup_health_check(&self) -> Result<Vec<Server>> {
        self.config
            .health_check_servers
            .iter()
            .map(|entry| {
                let mode = parse_mode(entry, Some(Mode::RequestResponse))?;
                let mut config = ServerConfig::health(&entry.name, &entry.host, &entry.path, entry.port);
                config.bind = bind(entry)?;
                config.restart = entry.restart.unwrap_or(true);
                config.protocol = config.protocol.into_mode(mode);
                config.security = self.tls.clone();
                self.apply_hooks(&mut config);
                Server::new(config)
            })
            .collect()
    }

    fn setup_metrics(&self) -> Result<Vec<Server>> {
        let mut servers = Vec::new();
        for entry in &self.config.metrics_servers {
            if entry.name != PPROF_SERVER {
                tracing::debug!(server = %entry.name, "Unrecognised metrics server, skipping");
                continue;
            }
            let mode = parse_mode(entry, Some(Mode::RequestResponse))?;
            let protocol = Protocol::RequestResponse(HttpOptions {
                handler: Some(metrics::router()),
                timeouts: http_timeouts(entry),
            })
            .into_mode(mode);
            servers.push(Server::new(self.server_config(entry, protocol)?)?);
        }
        Ok(servers)
    }

    fn server_config(&self, entry: &ServerEntry, protocol: Protocol) -> Result<ServerConfig> {
        let mut config = ServerConfig {
            name: entry.name.clone(),
            bind: bind(entry)?,
            security: self.tls.clone(),
            probe_wait: parse_or(&entry.probe_wait_time, Duration::ZERO),
            shutdown_duration: parse_or(&entry.http.shutdown_duration, DEFAULT_SHUTDOWN_DURATION),
            restart: entry.restart.unwrap_or(true),
            protocol,
            ..Default::default()
        };
        self.apply_hooks(&mut config);
        Ok(config)
    }

    fn apply_hooks(&self, config: &mut ServerConfig) {
        if let Some(hook) = self.pre_start.get(&config.name) {
            config.pre_start = Some(hook.clone());
        }
        if let Some(hook) = self.pre_stop.get(&config.name) {
            config.pre_stop = Some(hook.clone());
        }
    }
}

/// Mode of an entry; an empty mode string selects `default` when given.
fn parse_mode(entry: &ServerEntry, default: Option<Mode>) -> Result<Mode> {
    match (entry.mode.trim(), default) {
        ("", Some(mode)) => Ok(mode),
        (raw, _) => Mode::parse(raw).ok_or_else(|| {
            Error::InvalidConfiguration(format!("server {}: unknown mode {:?}", entry.name, entry.mode))
        }),
    }
}

/// Listening endpoint of an entry: `host:port`, or a socket path on the
/// `unix` network.
fn bind(entry: &ServerEntry) -> Result<Bind> {
    match entry.network.trim().to_ascii_lowercase().as_str() {
        "" | "tcp" => Ok(Bind::address(&entry.host, entry.port)),
        "unix" => Ok(Bind::Unix(PathBuf::from(&entry.socket_path))),
        other => Err(Error::InvalidConfiguration(format!(
            "server {}: unknown network {other:?}",
            entry.name
        ))),
    }
}

fn http_timeouts(entry: &ServerEntry) -> HttpTimeouts {
    let http = &entry.http;
    HttpTimeouts {
        handler_timeout: parse_or(&http.handler_timeout, Duration::ZERO),
        read_header_timeout: parse_or(&http.read_header_timeout, Duration::ZERO),
        read_timeout: parse_or(&http.read_timeout, Duration::ZERO),
        write_timeout: parse_or(&http.write_timeout, Duration::ZERO),
        idle_timeout: parse_or(&http.idle_timeout, Duration::ZERO),
    }
}

fn grpc_settings(entry: &ServerEntry) -> GrpcSettings {
    let grpc = &entry.grpc;
    let optional = |raw: &str| (!raw.trim().is_empty()).then(|| parse_or(raw, Duration::ZERO));
    GrpcSettings {
        max_concurrent_streams: grpc.max_concurrent_streams,
        initial_window_size: grpc.initial_window_size,
        initial_conn_window_size: grpc.initial_conn_window_size,
        keepalive_time: optional(&grpc.keepalive.time),
        keepalive_timeout: optional(&grpc.keepalive.timeout),
        max_connection_age: optional(&grpc.keepalive.max_conn_age),
        connection_timeout: optional(&grpc.connection_timeout),
        max_frame_size: grpc.max_frame_size,
        max_header_list_size: grpc.max_header_list_size,
        interceptors: Interceptors::from_names(&grpc.interceptors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{GrpcConfig, HttpConfig, KeepaliveConfig};

    fn entry(name: &str, mode: &str) -> ServerEntry {
        ServerEntry {
            name: name.into(),
            mode: mode.into(),
            host: "127.0.0.1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_mode_uses_default_only_when_given() {
        assert_eq!(parse_mode(&entry("h", ""), Some(Mode::RequestResponse)).unwrap(), Mode::RequestResponse);
        assert!(matches!(parse_mode(&entry("a", ""), None), Err(Error::InvalidConfiguration(_))));
        assert_eq!(parse_mode(&entry("g", "gql"), None).unwrap(), Mode::QueryLanguage);
    }

    #[test]
    fn network_selects_the_bind_target() {
        let tcp = entry("rest", "REST");
        assert!(matches!(bind(&tcp).unwrap(), Bind::Address { ref host, port: 0 } if host == "127.0.0.1"));

        let mut unix = entry("rest", "REST");
        unix.network = "Unix".into();
        unix.socket_path = "/run/rest.sock".into();
        assert!(matches!(bind(&unix).unwrap(), Bind::Unix(ref path) if path == Path::new("/run/rest.sock")));

        let mut udp = entry("rest", "REST");
        udp.network = "udp".into();
        assert!(matches!(bind(&udp), Err(Error::InvalidConfiguration(ref msg)) if msg.contains("udp")));
    }

    #[test]
    fn http_timeouts_parse_with_fallback() {
        let mut e = entry("rest", "REST");
        e.http = HttpConfig {
            read_timeout: "2s".into(),
            write_timeout: "bogus".into(),
            idle_timeout: "1m".into(),
            ..Default::default()
        };
        let timeouts = http_timeouts(&e);
        assert_eq!(timeouts.read_timeout, Duration::from_secs(2));
        assert_eq!(timeouts.write_timeout, Duration::ZERO);
        assert_eq!(timeouts.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn grpc_settings_map_every_field() {
        let mut e = entry("grpc", "GRPC");
        e.grpc = GrpcConfig {
            max_concurrent_streams: Some(8),
            keepalive: KeepaliveConfig {
                time: "30s".into(),
                timeout: String::new(),
                max_conn_age: "10m".into(),
            },
            connection_timeout: "5s".into(),
            max_header_list_size: Some(8192),
            interceptors: vec!["RecoverInterceptor".into()],
            ..Default::default()
        };
        let settings = grpc_settings(&e);
        assert_eq!(settings.max_concurrent_streams, Some(8));
        assert_eq!(settings.keepalive_time, Some(Duration::from_secs(30)));
        assert_eq!(settings.keepalive_timeout, None);
        assert_eq!(settings.connection_timeout, Some(Duration::from_secs(5)));
        assert_eq!(settings.max_connection_age, Some(Duration::from_secs(600)));
        assert_eq!(settings.max_header_list_size, Some(8192));
        assert!(settings.interceptors.recover);
        assert!(!settings.interceptors.access_log);
    }
}
