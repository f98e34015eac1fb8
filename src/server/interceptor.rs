//! gRPC interceptors, applied as one tower layer around the RPC routes.
//!
//! # Responsibilities
//! - Access log: method, status and latency of every call
//! - Recover: turn a handler panic into a gRPC `INTERNAL` response
//!
//! Interceptors are enabled by name from configuration. Unknown names are
//! skipped.

use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{header, HeaderValue, Request, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::{Layer, Service};

const GRPC_STATUS: &str = "grpc-status";
const GRPC_MESSAGE: &str = "grpc-message";
const GRPC_INTERNAL: &str = "13";

/// Set of enabled interceptors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interceptors {
    pub access_log: bool,
    pub recover: bool,
}

impl Interceptors {
    /// Enable interceptors from their configured names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut interceptors = Self::default();
        for name in names {
            match name.as_ref().trim().to_ascii_lowercase().as_str() {
                "accessloginterceptor" | "accesslog" | "traceinterceptor" | "trace"
                | "metricinterceptor" | "metric" => interceptors.access_log = true,
                "recoverinterceptor" | "recover" => interceptors.recover = true,
                other => tracing::warn!(interceptor = %other, "Unknown gRPC interceptor, skipping"),
            }
        }
        interceptors
    }
}

impl<S> Layer<S> for Interceptors {
    type Service = Intercepted<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Intercepted {
            inner,
            interceptors: *self,
        }
    }
}

/// Service produced by [`Interceptors`].
#[derive(Debug, Clone)]
pub struct Intercepted<S> {
    inner: S,
    interceptors: Interceptors,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Intercepted<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness and leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptors = self.interceptors;
        let method = request.uri().path().to_owned();
        let started = Instant::now();

        Box::pin(async move {
            let call = inner.call(request);
            let result = if interceptors.recover {
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::error!(method = %method, "gRPC handler panicked, recovered");
                        Ok(internal_error())
                    }
                }
            } else {
                call.await
            };

            if interceptors.access_log {
                match &result {
                    Ok(response) => tracing::info!(
                        method = %method,
                        status = %response.status(),
                        grpc_status = grpc_status(response),
                        latency_ms = started.elapsed().as_millis() as u64,
                        "gRPC call"
                    ),
                    Err(_) => tracing::warn!(
                        method = %method,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "gRPC call failed"
                    ),
                }
            }
            result
        })
    }
}

/// Status carried in the response headers. Calls that completed normally
/// report it in trailers, which are treated as OK here.
fn grpc_status<B>(response: &Response<B>) -> &str {
    response
        .headers()
        .get(GRPC_STATUS)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("0")
}

fn internal_error<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    headers.insert(GRPC_STATUS, HeaderValue::from_static(GRPC_INTERNAL));
    headers.insert(GRPC_MESSAGE, HeaderValue::from_static("handler panicked"));
    response
}
