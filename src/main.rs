//! serverset
//!
//! Runs the server set described by a configuration file until SIGINT or
//! SIGTERM, then shuts it down in the configured order.
//!
//! ```text
//!   config.toml ──▶ Starter ──▶ Listener ──┬──▶ REST / GraphQL servers (axum)
//!                                          ├──▶ gRPC servers (tonic)
//!                                          ├──▶ health-check servers
//!                                          └──▶ pprof metrics server
//! ```
//!
//! The bundled handlers are placeholders for the owning service's APIs:
//! REST answers a status route and echoes JSON, GraphQL echoes the query,
//! and gRPC registers the standard health service.

use std::path::PathBuf;

use axum::{
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use serverset::config::load_config;
use serverset::lifecycle::shutdown_signal;
use serverset::observability::logging;
use serverset::server::registration;
use serverset::Starter;

#[derive(Parser, Debug)]
#[command(name = "serverset")]
#[command(about = "Run a configured set of REST, gRPC and GraphQL servers", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/serverset.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.logging.level);

    tracing::info!(config = ?cli.config, "serverset v{} starting", env!("CARGO_PKG_VERSION"));

    let listener = Starter::new(config.server_config)
        .with_rest(|entry| rest_router(&entry.name))
        .with_graphql(|_| graphql_router())
        .with_grpc(|entry| {
            let grpc = entry.grpc.clone();
            registration(move |routes| {
                let (_reporter, mut health) = tonic_health::server::health_reporter();
                if let Some(limit) = grpc.max_receive_message_size {
                    health = health.max_decoding_message_size(limit);
                }
                if let Some(limit) = grpc.max_send_message_size {
                    health = health.max_encoding_message_size(limit);
                }
                routes.add_service(health);
            })
        })
        .build()
        .await?;

    let root = CancellationToken::new();
    let mut errors = listener.listen_and_serve(&root).await;

    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            _ = &mut signal => break,
            Some(err) = errors.recv() => tracing::error!(error = %err, "Server error"),
        }
    }

    let result = listener.shutdown().await;
    root.cancel();
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn rest_router(name: &str) -> Router {
    let name = name.to_string();
    Router::new()
        .route(
            "/",
            get(move || {
                let name = name.clone();
                async move { Json(json!({ "server": name, "status": "ok" })) }
            }),
        )
        .route("/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
}

fn graphql_router() -> Router {
    Router::new().route(
        "/graphql",
        post(|Json(body): Json<Value>| async move { Json(json!({ "data": { "echo": body["query"] } })) }),
    )
}
