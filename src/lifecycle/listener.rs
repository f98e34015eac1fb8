//! Orchestrator owning a named set of servers.
//!
//! # Responsibilities
//! - Start servers in the configured order, then the remainder
//! - Fan every server's error stream into one aggregated stream
//! - Relisten servers that stop while the listener is active, unless a
//!   server opted out of restarts
//! - Stop servers in the configured order within one shared deadline
//!
//! # Design Decisions
//! - Startup is permissive: an unknown name is reported on the stream and
//!   skipped. Shutdown is strict: an unknown name aborts the sequence
//! - The supervisor is one task multiplexing all slots with
//!   `FuturesUnordered`, so a slow slot never blocks the others
//! - Shutdown marks the listener draining before stopping any server, and
//!   cancels the supervisor only after the per-server shutdowns

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::resilience::RestartPolicy;
use crate::server::Server;

/// Default bound on a full listener shutdown.
pub const DEFAULT_FULL_SHUTDOWN_DURATION: Duration = Duration::from_secs(30);

/// Owns a set of servers and coordinates their start, stop and restart.
pub struct Listener {
    servers: HashMap<String, Server>,
    startup_order: Vec<String>,
    shutdown_order: Vec<String>,
    shutdown_duration: Duration,
    restart: RestartPolicy,
    cancel: Mutex<Option<CancellationToken>>,
    draining: Arc<AtomicBool>,
}

/// Builder for [`Listener`].
#[derive(Default)]
pub struct ListenerBuilder {
    servers: HashMap<String, Server>,
    startup_order: Vec<String>,
    shutdown_order: Vec<String>,
    shutdown_duration: Option<Duration>,
    restart: RestartPolicy,
}

impl ListenerBuilder {
    /// Register a server under its own name. A later server with the same
    /// name replaces the earlier one.
    pub fn with_server(mut self, server: Server) -> Self {
        if let Some(previous) = self.servers.insert(server.name().to_string(), server) {
            tracing::warn!(server = %previous.name(), "Duplicate server name, replacing");
        }
        self
    }

    pub fn with_servers(self, servers: impl IntoIterator<Item = Server>) -> Self {
        servers.into_iter().fold(self, Self::with_server)
    }

    pub fn with_startup_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.startup_order = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_shutdown_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shutdown_order = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_shutdown_duration(mut self, duration: Duration) -> Self {
        self.shutdown_duration = Some(duration);
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    pub fn build(self) -> Listener {
        Listener {
            servers: self.servers,
            startup_order: self.startup_order,
            shutdown_order: self.shutdown_order,
            shutdown_duration: self.shutdown_duration.unwrap_or(DEFAULT_FULL_SHUTDOWN_DURATION),
            restart: self.restart,
            cancel: Mutex::new(None),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// A supervised server together with its current error stream.
struct Slot {
    server: Server,
    errors: mpsc::Receiver<Error>,
    since: Instant,
    quick_exits: u32,
}

enum Event {
    Reported(Slot, Error),
    Closed(Slot),
    Relistened(Slot),
    Abandoned,
}

type Pending = FuturesUnordered<BoxFuture<'static, Event>>;

impl Listener {
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::default()
    }

    pub fn server(&self, name: &str) -> Option<&Server> {
        self.servers.get(name)
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    pub fn shutdown_duration(&self) -> Duration {
        self.shutdown_duration
    }

    /// Start every server and supervise them in the background.
    ///
    /// Servers named in the startup order start first, in that order; the
    /// rest follow in unspecified order. Servers already running are left
    /// alone. The returned stream aggregates every server's errors and
    /// stays open until the listener is shut down or `parent` is cancelled.
    pub async fn listen_and_serve(&self, parent: &CancellationToken) -> mpsc::Receiver<Error> {
        // Room for every unknown startup name on top of the servers' own errors.
        let capacity = (self.servers.len() * 10).max(10) + self.startup_order.len();
        let (tx, rx) = mpsc::channel(capacity);
        self.draining.store(false, Ordering::SeqCst);

        let mut slots = Vec::with_capacity(self.servers.len());
        let mut ordered = HashSet::new();
        for name in &self.startup_order {
            match self.servers.get(name) {
                None => {
                    tracing::error!(server = %name, "Startup order names an unknown server");
                    let _ = tx.send(Error::ServerNotFound(name.clone())).await;
                }
                Some(server) => {
                    ordered.insert(name.as_str());
                    if !server.is_running() {
                        slots.push(start(server.clone()).await);
                    }
                }
            }
        }
        for (name, server) in &self.servers {
            if !ordered.contains(name.as_str()) && !server.is_running() {
                slots.push(start(server.clone()).await);
            }
        }

        let cancel = parent.child_token();
        if let Some(previous) = self.lock_cancel().replace(cancel.clone()) {
            previous.cancel();
        }
        tracing::info!(servers = slots.len(), "Listener started");

        tokio::spawn(supervise(slots, tx, cancel, self.draining.clone(), self.restart));
        rx
    }

    /// Stop every running server within the full shutdown duration.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_until(Instant::now() + self.shutdown_duration).await
    }

    /// Stop every running server, giving up at `deadline` or after the full
    /// shutdown duration, whichever comes first.
    ///
    /// Servers named in the shutdown order stop first, in that order; an
    /// unknown name there aborts the sequence with `ServerNotFound`.
    /// Errors are deduplicated by message and combined.
    pub async fn shutdown_until(&self, deadline: Instant) -> Result<()> {
        self.draining.store(true, Ordering::SeqCst);
        let deadline = deadline.min(Instant::now() + self.shutdown_duration);
        tracing::info!(
            remaining = ?deadline.saturating_duration_since(Instant::now()),
            "Listener shutting down"
        );

        let result = self.stop_servers(deadline).await;

        if let Some(cancel) = self.lock_cancel().take() {
            cancel.cancel();
        }
        match &result {
            Ok(()) => tracing::info!("Listener stopped"),
            Err(e) => tracing::warn!(error = %e, "Listener stopped with errors"),
        }
        result
    }

    async fn stop_servers(&self, deadline: Instant) -> Result<()> {
        let mut errors = Errors::default();
        let mut ordered = HashSet::new();
        for name in &self.shutdown_order {
            let server = self
                .servers
                .get(name)
                .ok_or_else(|| Error::ServerNotFound(name.clone()))?;
            ordered.insert(name.as_str());
            stop(server, deadline, &mut errors).await;
        }
        for (name, server) in &self.servers {
            if !ordered.contains(name.as_str()) {
                stop(server, deadline, &mut errors).await;
            }
        }
        Error::combine(errors.list)
    }

    fn lock_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .field("startup_order", &self.startup_order)
            .field("shutdown_order", &self.shutdown_order)
            .field("shutdown_duration", &self.shutdown_duration)
            .field("restart", &self.restart)
            .finish()
    }
}

/// Shutdown errors keyed by message text.
#[derive(Default)]
struct Errors {
    seen: HashSet<String>,
    list: Vec<Error>,
}

impl Errors {
    fn push(&mut self, error: Error) {
        for error in error.into_errors() {
            if error.is_server_closed() {
                continue;
            }
            if self.seen.insert(error.to_string()) {
                self.list.push(error);
            }
        }
    }
}

async fn stop(server: &Server, deadline: Instant, errors: &mut Errors) {
    if !server.is_running() {
        return;
    }
    if let Err(e) = server.shutdown_until(deadline).await {
        tracing::warn!(server = %server.name(), error = %e, "Server shutdown failed");
        errors.push(e);
    }
}

async fn start(server: Server) -> Slot {
    let errors = server.listen_and_serve().await;
    Slot {
        server,
        errors,
        since: Instant::now(),
        quick_exits: 0,
    }
}

fn watch(mut slot: Slot) -> BoxFuture<'static, Event> {
    async move {
        match slot.errors.recv().await {
            Some(error) => Event::Reported(slot, error),
            None => Event::Closed(slot),
        }
    }
    .boxed()
}

fn relisten(slot: Slot, delay: Duration, quick_exits: u32, draining: Arc<AtomicBool>) -> BoxFuture<'static, Event> {
    async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if draining.load(Ordering::SeqCst) {
            return Event::Abandoned;
        }
        let server = slot.server;
        let errors = server.listen_and_serve().await;
        if draining.load(Ordering::SeqCst) {
            // Shutdown began while relistening and may have skipped this server.
            let _ = server.shutdown().await;
            return Event::Abandoned;
        }
        metrics::record_restart(server.name());
        tracing::info!(server = %server.name(), delay = ?delay, "Server relistened");
        Event::Relistened(Slot {
            server,
            errors,
            since: Instant::now(),
            quick_exits,
        })
    }
    .boxed()
}

/// Supervising loop: forward errors, relisten closed slots, exit on cancel.
async fn supervise(
    slots: Vec<Slot>,
    out: mpsc::Sender<Error>,
    cancel: CancellationToken,
    draining: Arc<AtomicBool>,
    policy: RestartPolicy,
) {
    let mut pending: Pending = slots.into_iter().map(watch).collect();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(event) = pending.next(), if !pending.is_empty() => event,
        };

        match event {
            Event::Reported(slot, error) => {
                if !error.is_server_closed() {
                    tracing::warn!(server = %slot.server.name(), error = %error, "Server reported error");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = out.send(error) => {}
                    }
                }
                pending.push(watch(slot));
            }
            Event::Closed(slot) => {
                if draining.load(Ordering::SeqCst) {
                    tracing::debug!(server = %slot.server.name(), "Server closed during shutdown");
                    continue;
                }
                if !slot.server.restart_enabled() {
                    tracing::warn!(server = %slot.server.name(), "Server stopped, restart disabled");
                    continue;
                }
                let (delay, quick_exits) = policy.on_exit(slot.quick_exits, slot.since.elapsed());
                tracing::warn!(server = %slot.server.name(), delay = ?delay, "Server stopped, relistening");
                pending.push(relisten(slot, delay, quick_exits, draining.clone()));
            }
            Event::Relistened(slot) => pending.push(watch(slot)),
            Event::Abandoned => {}
        }
    }

    tracing::debug!("Listener supervisor exited");
}
