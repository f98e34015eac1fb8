//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Record server lifecycle metrics through the `metrics` facade
//! - Install a Prometheus recorder once per process
//! - Serve the profiling endpoint (`/metrics`, `/debug/pprof/`)
//!
//! # Metrics
//! - `server_running` (gauge): 1 while a server is serving, by server
//! - `server_restarts_total` (counter): supervisor relistens, by server
//! - `server_errors_total` (counter): errors reported on a server's stream
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so the lifecycle
//!   core never depends on the exporter being configured
//! - When another recorder already owns the global slot the handle still
//!   renders, just without facade metrics

use std::sync::OnceLock;

use axum::{routing::get, Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Prometheus handle, installing the global recorder on first use.
pub fn prometheus_handle() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Prometheus recorder not installed, rendering detached");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

pub fn record_server_running(server: &str, running: bool) {
    metrics::gauge!("server_running", "server" => server.to_string()).set(if running { 1.0 } else { 0.0 });
}

pub fn record_restart(server: &str) {
    metrics::counter!("server_restarts_total", "server" => server.to_string()).increment(1);
}

pub fn record_server_error(server: &str) {
    metrics::counter!("server_errors_total", "server" => server.to_string()).increment(1);
}

#[derive(Debug, Serialize)]
struct RuntimeSummary {
    workers: usize,
    alive_tasks: usize,
}

/// Router for the profiling server.
pub fn router() -> Router {
    let handle = prometheus_handle();
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/debug/pprof/", get(runtime_summary))
}

async fn runtime_summary() -> Json<RuntimeSummary> {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(RuntimeSummary {
        workers: metrics.num_workers(),
        alive_tasks: metrics.num_alive_tasks(),
    })
}
