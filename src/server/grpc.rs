//! gRPC serving engine.
//!
//! # Responsibilities
//! - Hold the routes populated by the registration callback
//! - Build a tonic server with the configured transport settings and
//!   interceptors for every serve attempt
//! - Terminate TLS per connection when a security context is present
//!
//! # Design Decisions
//! - Routes are built once at construction and cloned per attempt, so
//!   restarts reuse the same service instances
//! - Draining feeds tonic's graceful shutdown. tonic runs every connection
//!   in its own task, so each accepted stream is wrapped in [`Closable`]
//!   and the hard close reaches them directly

use std::io;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::{Routes, RoutesBuilder};
use tonic::transport::server::Connected;
use tonic::transport::Server;

use super::options::{GrpcSettings, Registration};
use super::Stop;
use crate::error::BoxError;
use crate::net::listener::Socket;
use crate::net::tls::SecurityContext;
use crate::net::Closable;

type Incoming<IO> = Pin<Box<dyn Stream<Item = io::Result<IO>> + Send>>;

pub(crate) struct GrpcEngine {
    routes: Routes,
    settings: GrpcSettings,
    security: Option<SecurityContext>,
}

impl GrpcEngine {
    pub(crate) fn new(registration: Registration, settings: GrpcSettings, security: Option<SecurityContext>) -> Self {
        let mut builder = RoutesBuilder::default();
        registration(&mut builder);
        Self {
            routes: builder.routes(),
            settings,
            security,
        }
    }

    /// Serve until `stop` drains and all in-flight calls finish, or until
    /// `stop` closes every connection.
    pub(crate) async fn serve(&self, socket: Socket, stop: Stop) -> Result<(), BoxError> {
        match socket {
            Socket::Tcp(listener) => {
                let incoming = TcpListenerStream::new(tokio::net::TcpListener::from_std(listener)?);
                self.serve_incoming(closable(incoming, &stop), &stop).await
            }
            #[cfg(unix)]
            Socket::Unix(listener) => {
                let listener = tokio::net::UnixListener::from_std(listener)?;
                let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);
                self.serve_incoming(closable(incoming, &stop), &stop).await
            }
        }
    }

    async fn serve_incoming<IO>(&self, incoming: Incoming<IO>, stop: &Stop) -> Result<(), BoxError>
    where
        IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    {
        let settings = &self.settings;
        let mut builder = Server::builder()
            .max_concurrent_streams(settings.max_concurrent_streams)
            .initial_stream_window_size(settings.initial_window_size)
            .initial_connection_window_size(settings.initial_conn_window_size)
            .http2_keepalive_interval(settings.keepalive_time)
            .http2_keepalive_timeout(settings.keepalive_timeout)
            .http2_max_header_list_size(settings.max_header_list_size)
            .max_frame_size(settings.max_frame_size);
        if let Some(timeout) = settings.connection_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(age) = settings.max_connection_age {
            builder = builder.max_connection_age(age);
        }
        let router = builder
            .layer(settings.interceptors)
            .add_routes(self.routes.clone());

        let signal = stop.drained();
        match &self.security {
            None => router.serve_with_incoming_shutdown(incoming, signal).await?,
            Some(tls) => {
                router
                    .serve_with_incoming_shutdown(tls_incoming(incoming, tls), signal)
                    .await?
            }
        }
        Ok(())
    }
}

/// Wrap accepted streams so the server can sever them.
fn closable<S, IO>(incoming: S, stop: &Stop) -> Incoming<Closable<IO>>
where
    S: Stream<Item = io::Result<IO>> + Send + 'static,
    IO: Send + 'static,
{
    let close = stop.close_token().clone();
    Box::pin(incoming.map(move |conn| conn.map(|io| Closable::new(io, &close))))
}

/// Wrap accepted connections in TLS. Failed handshakes are dropped.
fn tls_incoming<IO>(incoming: Incoming<IO>, tls: &SecurityContext) -> Incoming<tokio_rustls::server::TlsStream<IO>>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let acceptor = tls.acceptor();
    Box::pin(incoming.filter_map(move |conn| {
        let acceptor = acceptor.clone();
        async move {
            match conn {
                Ok(stream) => match acceptor.accept(stream).await {
                    Ok(stream) => Some(Ok(stream)),
                    Err(e) => {
                        tracing::warn!(error = %e, "TLS handshake failed");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            }
        }
    }))
}
