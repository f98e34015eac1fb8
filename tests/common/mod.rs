//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{routing::get, Router};
use serverset::server::{Bind, Protocol, ServerConfig};
use serverset::Server;
use tonic::transport::{Channel, Endpoint};
use tonic_health::pb::health_client::HealthClient;

/// Router with `/` answering "ok" and `/slow` answering after `delay`.
pub fn test_router(delay: Duration) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/slow",
            get(move || async move {
                tokio::time::sleep(delay).await;
                "slow"
            }),
        )
}

/// Request/response server config on an ephemeral local port.
pub fn rest_config(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.into(),
        bind: Bind::address("127.0.0.1", 0),
        protocol: Protocol::request_response(test_router(Duration::from_secs(10))),
        ..Default::default()
    }
}

pub fn rest_server(name: &str) -> Server {
    Server::new(rest_config(name)).unwrap()
}

/// RPC server serving the standard health service.
pub fn grpc_server(name: &str) -> Server {
    Server::new(ServerConfig {
        name: name.into(),
        bind: Bind::address("127.0.0.1", 0),
        protocol: Protocol::rpc(|routes| {
            let (_reporter, health) = tonic_health::server::health_reporter();
            routes.add_service(health);
        }),
        ..Default::default()
    })
    .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// GET `path` and return status and body.
pub async fn get_text(addr: SocketAddr, path: &str) -> reqwest::Result<(u16, String)> {
    let response = reqwest::Client::new().get(url(addr, path)).send().await?;
    let status = response.status().as_u16();
    Ok((status, response.text().await?))
}

/// Health-service client connected to `addr`.
pub async fn health_client(addr: SocketAddr) -> HealthClient<Channel> {
    let channel = Endpoint::from_shared(url(addr, ""))
        .unwrap()
        .connect()
        .await
        .unwrap();
    HealthClient::new(channel)
}
