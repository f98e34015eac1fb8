//! Serving modes.

use std::fmt;

/// The serving style of a [`Server`](super::Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Request/response HTTP API.
    RequestResponse,
    /// gRPC API.
    Rpc,
    /// Query-language (GraphQL) API served over HTTP.
    QueryLanguage,
}

impl Mode {
    /// Parses a configured mode name. Matching is case-insensitive;
    /// unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Mode> {
        match name.trim().to_ascii_uppercase().as_str() {
            "REST" | "HTTP" => Some(Mode::RequestResponse),
            "GRPC" => Some(Mode::Rpc),
            "GRAPHQL" | "GQL" => Some(Mode::QueryLanguage),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::RequestResponse => "REST",
            Mode::Rpc => "gRPC",
            Mode::QueryLanguage => "GraphQL",
        };
        f.write_str(name)
    }
}
