//! Health-check endpoint.
//!
//! A health server is a plain request/response server whose handler answers
//! `200 OK` on one path. Its lifecycle defaults live in
//! [`ServerConfig::health`](crate::server::ServerConfig::health).

use axum::{http::StatusCode, routing::get, Router};

/// Router answering `200 OK` on `path`.
pub fn router(path: &str) -> Router {
    Router::new().route(&normalize(path), get(|| async { (StatusCode::OK, "OK") }))
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
