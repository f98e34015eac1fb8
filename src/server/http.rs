//! HTTP serving engine for the request/response and query-language modes.
//!
//! # Responsibilities
//! - Wrap the registered router with request timeout and trace layers
//! - Apply header-read and idle timeouts to every connection
//! - Serve plain or TLS connections on a pre-bound TCP or unix socket
//!
//! # Design Decisions
//! - On TCP, `axum_server::Handle` is the drain primitive: graceful drain
//!   stops accepting and lets keep-alive connections finish their last
//!   request. The server's stop controls are relayed onto the handle
//! - On unix sockets the accept loop is local; connections are watched by
//!   hyper-util's graceful shutdown and wrapped in [`Closable`] for the
//!   hard close
//! - The drain itself is unbounded; the owning server enforces the
//!   deadline and escalates to a hard close

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::options::HttpTimeouts;
use super::Stop;
use crate::net::listener::Socket;
use crate::net::tls::SecurityContext;

pub(crate) struct HttpEngine {
    app: Router,
    builder: Builder<TokioExecutor>,
    security: Option<SecurityContext>,
}

impl HttpEngine {
    #[allow(deprecated)]
    pub(crate) fn new(handler: Router, timeouts: HttpTimeouts, security: Option<SecurityContext>) -> Self {
        let mut app = handler.layer(TraceLayer::new_for_http());
        if let Some(limit) = timeouts.request_timeout() {
            app = app.layer(TimeoutLayer::new(limit));
        }
        let mut builder = Builder::new(TokioExecutor::new());
        configure(&mut builder, &timeouts);
        Self {
            app,
            builder,
            security,
        }
    }

    /// Serve until `stop` drains and every connection has finished.
    pub(crate) async fn serve(&self, socket: Socket, stop: Stop) -> std::io::Result<()> {
        match socket {
            Socket::Tcp(listener) => self.serve_tcp(listener, stop).await,
            #[cfg(unix)]
            Socket::Unix(listener) => self.serve_unix(listener, stop).await,
        }
    }

    async fn serve_tcp(&self, socket: std::net::TcpListener, stop: Stop) -> std::io::Result<()> {
        let app = self.app.clone().into_make_service_with_connect_info::<SocketAddr>();
        let handle = Handle::new();
        let serving = async {
            match &self.security {
                None => {
                    let mut server = axum_server::from_tcp(socket);
                    *server.http_builder() = self.builder.clone();
                    server.handle(handle.clone()).serve(app).await
                }
                Some(tls) => {
                    let mut server = axum_server::from_tcp_rustls(socket, tls.rustls().clone());
                    *server.http_builder() = self.builder.clone();
                    server.handle(handle.clone()).serve(app).await
                }
            }
        };
        tokio::select! {
            result = serving => result,
            _ = relay(&handle, &stop) => Ok(()),
        }
    }

    #[cfg(unix)]
    async fn serve_unix(&self, socket: std::os::unix::net::UnixListener, stop: Stop) -> std::io::Result<()> {
        use hyper_util::server::graceful::GracefulShutdown;

        let listener = tokio::net::UnixListener::from_std(socket)?;
        let graceful = GracefulShutdown::new();
        let drained = stop.drained();
        tokio::pin!(drained);

        loop {
            let stream = tokio::select! {
                _ = &mut drained => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::debug!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            let io = crate::net::Closable::new(stream, stop.close_token());
            let watcher = graceful.watcher();
            let builder = self.builder.clone();
            let app = self.app.clone();
            let acceptor = self.security.as_ref().map(SecurityContext::acceptor);
            tokio::spawn(async move {
                let result = match acceptor {
                    None => unix::serve_connection(&builder, watcher, io, app).await,
                    Some(acceptor) => match acceptor.accept(io).await {
                        Ok(io) => unix::serve_connection(&builder, watcher, io, app).await,
                        Err(e) => {
                            tracing::warn!(error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Connection ended with error");
                }
            });
        }

        graceful.shutdown().await;
        Ok(())
    }
}

#[cfg(unix)]
mod unix {
    use axum::Router;
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use hyper_util::server::conn::auto::Builder;
    use hyper_util::server::graceful::Watcher;
    use hyper_util::service::TowerToHyperService;
    use tokio::io::{AsyncRead, AsyncWrite};

    use crate::error::BoxError;

    pub(super) async fn serve_connection<IO>(
        builder: &Builder<TokioExecutor>,
        watcher: Watcher,
        io: IO,
        app: Router,
    ) -> Result<(), BoxError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), TowerToHyperService::new(app));
        watcher.watch(conn).await
    }
}

/// Forward the server's stop controls to an axum-server handle. Never
/// completes; the serve future ends first.
async fn relay(handle: &Handle, stop: &Stop) {
    stop.drained().await;
    handle.graceful_shutdown(None);
    stop.close_token().cancelled().await;
    handle.shutdown();
    std::future::pending::<()>().await
}

fn configure(builder: &mut Builder<TokioExecutor>, timeouts: &HttpTimeouts) {
    if let Some(timeout) = enabled(timeouts.read_header_timeout) {
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(timeout);
    }
    if let Some(interval) = enabled(timeouts.idle_timeout) {
        builder
            .http2()
            .timer(TokioTimer::new())
            .keep_alive_interval(Some(interval))
            .keep_alive_timeout(interval);
    }
}

fn enabled(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}
