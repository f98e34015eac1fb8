//! Server construction options.
//!
//! # Responsibilities
//! - Describe everything a [`Server`](super::Server) needs in one struct
//! - Carry mode-specific settings in a closed sum type
//! - Provide fresh default values per call
//!
//! # Design Decisions
//! - Each protocol variant only holds the fields it uses; RPC mode never
//!   sees HTTP timeouts
//! - Hooks are async closures returning a boxed error

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::future::BoxFuture;
use tonic::service::RoutesBuilder;

use super::interceptor::Interceptors;
use super::mode::Mode;
use crate::error::BoxError;
use crate::health;
use crate::net::listener::join_host_port;
use crate::net::tls::SecurityContext;

/// Default time a server is given to drain.
pub const DEFAULT_SHUTDOWN_DURATION: Duration = Duration::from_secs(10);

/// Fallible zero-argument lifecycle callback.
pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Callback that attaches service implementations to an RPC server.
pub type Registration = Box<dyn FnOnce(&mut RoutesBuilder) + Send>;

/// Wrap an async closure as a [`Hook`].
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture<'static, Result<(), BoxError>>)
}

/// Wrap a closure as a [`Registration`].
pub fn registration<F>(f: F) -> Registration
where
    F: FnOnce(&mut RoutesBuilder) + Send + 'static,
{
    Box::new(f)
}

/// Where a server gets its listening socket from.
#[derive(Debug, Default)]
pub enum Bind {
    /// Nothing configured; construction fails.
    #[default]
    Unset,
    /// Bind `host:port` at construction. An empty host binds all interfaces.
    Address { host: String, port: u16 },
    /// Use an already bound socket.
    Listener(std::net::TcpListener),
    /// Bind a unix-domain socket at this path. Only available on unix.
    Unix(PathBuf),
}

impl Bind {
    pub fn address(host: impl Into<String>, port: u16) -> Self {
        Bind::Address {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Bind::Unix(path.into())
    }
}

impl fmt::Display for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bind::Unset => f.write_str("<unset>"),
            Bind::Address { host, port } => f.write_str(&join_host_port(host, *port)),
            Bind::Listener(socket) => match socket.local_addr() {
                Ok(addr) => write!(f, "{addr}"),
                Err(_) => f.write_str("<external socket>"),
            },
            Bind::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Timeouts applied to request/response and query-language servers.
/// A zero duration disables the corresponding timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Bound for one request; overrides the read/write sum when set.
    pub handler_timeout: Duration,
    pub read_header_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

impl HttpTimeouts {
    /// Upper bound for handling one request, reading and writing included.
    pub fn request_timeout(&self) -> Option<Duration> {
        if !self.handler_timeout.is_zero() {
            return Some(self.handler_timeout);
        }
        let total = self.read_timeout + self.write_timeout;
        (!total.is_zero()).then_some(total)
    }
}

/// Options for the HTTP based modes.
#[derive(Default)]
pub struct HttpOptions {
    pub handler: Option<Router>,
    pub timeouts: HttpTimeouts,
}

/// Transport settings for the RPC server.
#[derive(Debug, Clone, Default)]
pub struct GrpcSettings {
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub initial_conn_window_size: Option<u32>,
    pub keepalive_time: Option<Duration>,
    pub keepalive_timeout: Option<Duration>,
    /// Connections older than this are drained and closed.
    pub max_connection_age: Option<Duration>,
    /// Per-request timeout.
    pub connection_timeout: Option<Duration>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
    pub interceptors: Interceptors,
}

/// Options for RPC mode.
#[derive(Default)]
pub struct RpcOptions {
    pub registration: Option<Registration>,
    pub settings: GrpcSettings,
}

/// Serving mode together with its mode-specific attachment point.
pub enum Protocol {
    RequestResponse(HttpOptions),
    Rpc(RpcOptions),
    QueryLanguage(HttpOptions),
}

impl Protocol {
    pub fn request_response(handler: Router) -> Self {
        Protocol::RequestResponse(HttpOptions {
            handler: Some(handler),
            ..Default::default()
        })
    }

    pub fn query_language(handler: Router) -> Self {
        Protocol::QueryLanguage(HttpOptions {
            handler: Some(handler),
            ..Default::default()
        })
    }

    pub fn rpc<F>(register: F) -> Self
    where
        F: FnOnce(&mut RoutesBuilder) + Send + 'static,
    {
        Protocol::Rpc(RpcOptions {
            registration: Some(registration(register)),
            ..Default::default()
        })
    }

    pub fn mode(&self) -> Mode {
        match self {
            Protocol::RequestResponse(_) => Mode::RequestResponse,
            Protocol::Rpc(_) => Mode::Rpc,
            Protocol::QueryLanguage(_) => Mode::QueryLanguage,
        }
    }

    /// Switch to another mode, keeping whatever the target mode can use.
    pub fn into_mode(self, mode: Mode) -> Self {
        if self.mode() == mode {
            return self;
        }
        match (self, mode) {
            (Protocol::RequestResponse(http), Mode::QueryLanguage) => Protocol::QueryLanguage(http),
            (Protocol::QueryLanguage(http), Mode::RequestResponse) => Protocol::RequestResponse(http),
            (_, Mode::Rpc) => Protocol::Rpc(RpcOptions::default()),
            (_, Mode::RequestResponse) => Protocol::RequestResponse(HttpOptions::default()),
            (_, Mode::QueryLanguage) => Protocol::QueryLanguage(HttpOptions::default()),
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::RequestResponse(HttpOptions::default())
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::RequestResponse(http) | Protocol::QueryLanguage(http) => f
                .debug_struct(&self.mode().to_string())
                .field("handler", &http.handler.is_some())
                .field("timeouts", &http.timeouts)
                .finish(),
            Protocol::Rpc(rpc) => f
                .debug_struct("gRPC")
                .field("registration", &rpc.registration.is_some())
                .field("settings", &rpc.settings)
                .finish(),
        }
    }
}

/// Everything needed to construct a [`Server`](super::Server).
pub struct ServerConfig {
    /// Identity, unique within a listener.
    pub name: String,
    pub bind: Bind,
    pub security: Option<SecurityContext>,
    /// Delay between entering the draining state and closing the protocol.
    pub probe_wait: Duration,
    /// Upper bound for a full shutdown of this server.
    pub shutdown_duration: Duration,
    /// Whether a listener relistens this server after it stops on its own.
    pub restart: bool,
    pub pre_start: Option<Hook>,
    pub pre_stop: Option<Hook>,
    pub protocol: Protocol,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bind: Bind::Unset,
            security: None,
            probe_wait: Duration::ZERO,
            shutdown_duration: DEFAULT_SHUTDOWN_DURATION,
            restart: true,
            pre_start: None,
            pre_stop: None,
            protocol: Protocol::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults for a health-check server answering on `path`.
    pub fn health(name: impl Into<String>, host: impl Into<String>, path: &str, port: u16) -> Self {
        Self {
            name: name.into(),
            bind: Bind::address(host, port),
            probe_wait: Duration::from_secs(2),
            shutdown_duration: Duration::from_secs(4),
            protocol: Protocol::RequestResponse(HttpOptions {
                handler: Some(health::router(path)),
                timeouts: HttpTimeouts {
                    handler_timeout: Duration::ZERO,
                    read_header_timeout: Duration::from_secs(3),
                    read_timeout: Duration::from_secs(2),
                    write_timeout: Duration::from_secs(3),
                    idle_timeout: Duration::from_secs(3),
                },
            }),
            ..Default::default()
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("bind", &self.bind)
            .field("tls", &self.security.is_some())
            .field("probe_wait", &self.probe_wait)
            .field("shutdown_duration", &self.shutdown_duration)
            .field("restart", &self.restart)
            .field("pre_start", &self.pre_start.is_some())
            .field("pre_stop", &self.pre_stop.is_some())
            .field("protocol", &self.protocol)
            .finish()
    }
}
