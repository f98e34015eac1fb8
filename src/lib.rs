//! Multi-protocol server lifecycle supervisor.
//!
//! A [`Server`] serves one endpoint in one mode (request/response, RPC or
//! query-language) with a uniform start/stop contract. A [`Listener`] owns a
//! named set of servers: it starts and stops them in a configured order,
//! fans their errors into one stream and relistens servers that stop
//! unexpectedly. The [`Starter`] builds a listener from configuration.

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;
pub mod starter;

pub use error::{Error, Result};
pub use lifecycle::{Listener, ListenerBuilder};
pub use net::SecurityContext;
pub use server::{Mode, Protocol, Server, ServerConfig, ServerState};
pub use starter::Starter;
