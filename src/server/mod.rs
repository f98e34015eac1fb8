//! Single-endpoint server with a uniform lifecycle.
//!
//! # Data Flow
//! ```text
//! ServerConfig
//!     → Server::new (bind socket, build protocol engine)
//!     → listen_and_serve (spawn serve task, return error stream)
//!     → shutdown (pre-stop hook + probe wait, graceful close, join task)
//!
//! States:
//!     Stopped → Running → Draining → Stopping → Stopped
//! ```
//!
//! # Design Decisions
//! - The bound socket and protocol engine are created once and reused by
//!   every serve attempt
//! - Errors never escape as panics; they are sent on the stream returned by
//!   `listen_and_serve` or returned from `shutdown`
//! - The drain deadline is enforced here for every mode; when it passes
//!   every connection is severed and the serve task is aborted
//! - The probe wait and the pre-stop hook count against the same deadline

pub mod interceptor;
pub mod mode;
pub mod options;

mod grpc;
mod http;

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

pub use interceptor::Interceptors;
pub use mode::Mode;
pub use options::{
    hook, registration, Bind, GrpcSettings, Hook, HttpOptions, HttpTimeouts, Protocol, Registration, RpcOptions,
    ServerConfig,
};

use self::grpc::GrpcEngine;
use self::http::HttpEngine;
use crate::error::{Error, Result};
use crate::net::listener::{self, Address, Socket};
use crate::observability::metrics;

/// Capacity of a single server's error stream.
const ERROR_BUFFER: usize = 4;

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    /// Pre-stop hook and probe wait in progress.
    Draining,
    /// Protocol graceful close in progress.
    Stopping,
}

enum Engine {
    Http(HttpEngine),
    Grpc(GrpcEngine),
}

/// Stop controls for one serve attempt, shared with the protocol engine.
#[derive(Clone, Default)]
pub(crate) struct Stop {
    draining: CancellationToken,
    closing: CancellationToken,
}

impl Stop {
    /// Stop accepting and let in-flight work finish.
    fn drain(&self) {
        self.draining.cancel();
    }

    /// Sever every connection of the attempt.
    fn close(&self) {
        self.draining.cancel();
        self.closing.cancel();
    }

    pub(crate) fn drained(&self) -> WaitForCancellationFutureOwned {
        self.draining.clone().cancelled_owned()
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.closing
    }
}

struct Run {
    task: JoinHandle<()>,
    stop: Stop,
}

struct Inner {
    name: String,
    mode: Mode,
    socket: Socket,
    address: Address,
    probe_wait: Duration,
    shutdown_duration: Duration,
    restart: bool,
    pre_start: Option<Hook>,
    pre_stop: Option<Hook>,
    engine: Engine,
    state: RwLock<ServerState>,
    run: Mutex<Option<Run>>,
    #[cfg(test)]
    injected_failures: std::sync::atomic::AtomicUsize,
}

/// One listening endpoint serving one protocol mode.
///
/// Cloning is cheap; clones share the same socket and state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Build a server, binding its socket and preparing its protocol engine.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let ServerConfig {
            name,
            bind,
            security,
            probe_wait,
            shutdown_duration,
            restart,
            pre_start,
            pre_stop,
            protocol,
        } = config;

        let target = bind.to_string();
        let socket = match bind {
            Bind::Listener(socket) => Socket::Tcp(listener::adopt(socket)?),
            Bind::Address { host, port } if !host.is_empty() || port != 0 => Socket::Tcp(listener::bind(&host, port)?),
            #[cfg(unix)]
            Bind::Unix(path) if !path.as_os_str().is_empty() => Socket::Unix(listener::bind_unix(&path)?),
            _ => {
                return Err(Error::InvalidConfiguration(format!(
                    "server {name}: no listening socket or address configured"
                )))
            }
        };
        let address = socket.address().map_err(|source| Error::Bind {
            address: target,
            source,
        })?;

        let mode = protocol.mode();
        let engine = match protocol {
            Protocol::RequestResponse(http) | Protocol::QueryLanguage(http) => {
                let handler = http.handler.ok_or_else(|| {
                    Error::InvalidConfiguration(format!("{mode} server {name}: no handler registered"))
                })?;
                Engine::Http(HttpEngine::new(handler, http.timeouts, security))
            }
            Protocol::Rpc(rpc) => {
                let registration = rpc.registration.ok_or_else(|| {
                    Error::InvalidConfiguration(format!("{mode} server {name}: no registration callback"))
                })?;
                Engine::Grpc(GrpcEngine::new(registration, rpc.settings, security))
            }
        };

        tracing::info!(server = %name, mode = %mode, address = %address, "Server created");

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                mode,
                socket,
                address,
                probe_wait,
                shutdown_duration,
                restart,
                pre_start,
                pre_stop,
                engine,
                state: RwLock::new(ServerState::Stopped),
                run: Mutex::new(None),
                #[cfg(test)]
                injected_failures: std::sync::atomic::AtomicUsize::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Where the bound socket can be reached.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// TCP address of the bound socket; `None` for unix-domain sockets.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.address.tcp()
    }

    /// Whether a listener relistens this server after it stops on its own.
    pub fn restart_enabled(&self) -> bool {
        self.inner.restart
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Start serving in a background task.
    ///
    /// Returns once the task is about to accept connections. The returned
    /// stream carries pre-start hook failures and serve failures and closes
    /// when the serve attempt ends. Calling this on a server that is not
    /// stopped is a no-op returning an already closed stream.
    pub async fn listen_and_serve(&self) -> mpsc::Receiver<Error> {
        let (errors, stream) = mpsc::channel(ERROR_BUFFER);
        {
            let mut state = self.write_state();
            if *state != ServerState::Stopped {
                return stream;
            }
            *state = ServerState::Running;
        }
        metrics::record_server_running(&self.inner.name, true);

        let stop = Stop::default();
        let (started_tx, started_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().serve(errors, started_tx, stop.clone()));
        *self.lock_run() = Some(Run { task, stop });

        let _ = started_rx.await;
        tracing::info!(
            server = %self.inner.name,
            mode = %self.inner.mode,
            address = %self.inner.address,
            "Server listening"
        );
        stream
    }

    /// Gracefully stop the server within its own shutdown duration.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_until(Instant::now() + self.inner.shutdown_duration).await
    }

    /// Gracefully stop the server, giving up at `deadline` or after the
    /// server's own shutdown duration, whichever comes first.
    ///
    /// A server that is not running is left alone and `Ok(())` is returned.
    pub async fn shutdown_until(&self, deadline: Instant) -> Result<()> {
        let deadline = deadline.min(Instant::now() + self.inner.shutdown_duration);
        {
            let mut state = self.write_state();
            if *state != ServerState::Running {
                return Ok(());
            }
            *state = ServerState::Draining;
        }
        let name = &self.inner.name;
        tracing::info!(server = %name, probe_wait = ?self.inner.probe_wait, "Server draining");

        let mut errors = Vec::new();
        let probe_end = (Instant::now() + self.inner.probe_wait).min(deadline);
        match &self.inner.pre_stop {
            Some(pre_stop) => {
                let mut pending = tokio::spawn(pre_stop());
                tokio::time::sleep_until(probe_end).await;
                match tokio::time::timeout_at(deadline, &mut pending).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(source))) => errors.push(Error::PreStop {
                        name: name.clone(),
                        source,
                    }),
                    Ok(Err(join)) => errors.push(Error::TaskPanicked {
                        name: name.clone(),
                        message: join.to_string(),
                    }),
                    Err(_) => {
                        pending.abort();
                        errors.push(Error::PreStop {
                            name: name.clone(),
                            source: "pre-stop hook did not finish before the deadline".into(),
                        });
                    }
                }
            }
            None => tokio::time::sleep_until(probe_end).await,
        }

        self.set_state(ServerState::Stopping);
        let run = self.lock_run().take();
        if let Some(Run { mut task, stop }) = run {
            let grace = deadline.saturating_duration_since(Instant::now());
            stop.drain();
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join)) if join.is_panic() => errors.push(Error::TaskPanicked {
                    name: name.clone(),
                    message: join.to_string(),
                }),
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::warn!(server = %name, grace = ?grace, "Drain deadline exceeded, closing");
                    stop.close();
                    task.abort();
                    let _ = task.await;
                    errors.push(Error::DeadlineExceeded {
                        name: name.clone(),
                        deadline: grace,
                    });
                }
            }
        }

        self.set_state(ServerState::Stopped);
        metrics::record_server_running(name, false);
        tracing::info!(server = %name, "Server stopped");
        Error::combine(errors)
    }

    /// Body of the serve task.
    async fn serve(self, errors: mpsc::Sender<Error>, started: oneshot::Sender<()>, stop: Stop) {
        let name = self.inner.name.clone();

        if let Some(pre_start) = &self.inner.pre_start {
            if let Err(source) = pre_start().await {
                tracing::warn!(server = %name, error = %source, "Pre-start hook failed");
                self.report(&errors, Error::PreStart {
                    name: name.clone(),
                    source,
                })
                .await;
            }
        }

        let socket = self.inner.socket.try_clone();
        let _ = started.send(());

        let result: std::result::Result<(), crate::error::BoxError> = match socket {
            Err(e) => Err(e.into()),
            #[cfg(test)]
            Ok(_) if self.take_injected_failure() => Err("injected serve failure".into()),
            Ok(socket) => match &self.inner.engine {
                Engine::Http(engine) => engine.serve(socket, stop).await.map_err(Into::into),
                Engine::Grpc(engine) => engine.serve(socket, stop).await,
            },
        };

        let requested = self.state() != ServerState::Running;
        let outcome = match result {
            Err(source) => Error::Serve {
                name: name.clone(),
                source,
            },
            Ok(()) if requested => Error::ServerClosed(name.clone()),
            Ok(()) => Error::UnexpectedStop(name.clone()),
        };
        if !outcome.is_server_closed() {
            tracing::error!(server = %name, error = %outcome, "Server exited");
            self.report(&errors, outcome).await;
        }

        // Leave Running before the stream closes so a supervisor can relisten.
        let exited = {
            let mut state = self.write_state();
            let was_running = *state == ServerState::Running;
            if was_running {
                *state = ServerState::Stopped;
            }
            was_running
        };
        if exited {
            metrics::record_server_running(&name, false);
        }
    }

    async fn report(&self, errors: &mpsc::Sender<Error>, error: Error) {
        metrics::record_server_error(&self.inner.name);
        let _ = errors.send(error).await;
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ServerState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServerState) {
        *self.write_state() = state;
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<Run>> {
        self.inner.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` serve attempts fail immediately.
    #[cfg(test)]
    pub(crate) fn inject_serve_failures(&self, count: usize) {
        self.inner
            .injected_failures
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.inner
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};

    fn rest(name: &str) -> Server {
        Server::new(ServerConfig {
            name: name.into(),
            bind: Bind::address("127.0.0.1", 0),
            protocol: Protocol::request_response(Router::new().route("/", get(|| async { "ok" }))),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn injected_failure_is_reported_and_leaves_server_stopped() {
        let server = rest("flaky");
        server.inject_serve_failures(1);

        let mut errors = server.listen_and_serve().await;
        let err = errors.recv().await.expect("serve failure");
        assert!(matches!(err, Error::Serve { ref name, .. } if name == "flaky"));
        assert!(errors.recv().await.is_none());
        assert_eq!(server.state(), ServerState::Stopped);

        // The next attempt serves normally.
        let _errors = server.listen_and_serve().await;
        assert!(server.is_running());
        server.shutdown().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_closes_stream_without_values() {
        let server = rest("quiet");
        let mut errors = server.listen_and_serve().await;
        server.shutdown().await.unwrap();
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn readiness_wait_is_cut_short_by_deadline() {
        let server = Server::new(ServerConfig {
            name: "patient".into(),
            bind: Bind::address("127.0.0.1", 0),
            probe_wait: Duration::from_secs(5),
            protocol: Protocol::request_response(Router::new()),
            ..Default::default()
        })
        .unwrap();
        let _errors = server.listen_and_serve().await;

        let started = std::time::Instant::now();
        let _ = server.shutdown_until(Instant::now() + Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn draining_server_is_not_restartable() {
        let server = Server::new(ServerConfig {
            name: "slow-drain".into(),
            bind: Bind::address("127.0.0.1", 0),
            probe_wait: Duration::from_millis(200),
            protocol: Protocol::request_response(Router::new()),
            ..Default::default()
        })
        .unwrap();
        let _errors = server.listen_and_serve().await;

        let stopping = {
            let server = server.clone();
            tokio::spawn(async move { server.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.state(), ServerState::Draining);

        let mut noop = server.listen_and_serve().await;
        assert!(noop.recv().await.is_none());

        stopping.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
