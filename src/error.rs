//! Error types shared by servers, the listener and the starter.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by lifecycle hooks and protocol layers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid api config: {0}")]
    InvalidConfiguration(String),

    #[error("server {0} not found")]
    ServerNotFound(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server {name} failed to serve: {source}")]
    Serve {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("server {0} stopped without a shutdown request")]
    UnexpectedStop(String),

    #[error("server {0} closed")]
    ServerClosed(String),

    #[error("server {name} pre-start hook failed: {source}")]
    PreStart {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("server {name} pre-stop hook failed: {source}")]
    PreStop {
        name: String,
        #[source]
        source: BoxError,
    },

    /// Message carries no server name: servers sharing one deadline
    /// deduplicate to a single error.
    #[error("shutdown deadline exceeded")]
    DeadlineExceeded { name: String, deadline: Duration },

    #[error("server {name} task panicked: {message}")]
    TaskPanicked { name: String, message: String },

    #[error("tls error: {0}")]
    Tls(#[source] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to shutdown: {}", join_messages(.0))]
    Multiple(Vec<Error>),
}

impl Error {
    /// Reports whether this is the "closed under an expected shutdown"
    /// sentinel, which callers never treat as a failure.
    pub fn is_server_closed(&self) -> bool {
        matches!(self, Error::ServerClosed(_))
    }

    /// Reports whether this error, or any error it combines, is a
    /// drain deadline expiry.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Error::DeadlineExceeded { .. } => true,
            Error::Multiple(errors) => errors.iter().any(Error::is_deadline_exceeded),
            _ => false,
        }
    }

    /// Flattens nested `Multiple` errors into their leaves.
    pub fn into_errors(self) -> Vec<Error> {
        match self {
            Error::Multiple(errors) => errors.into_iter().flat_map(Error::into_errors).collect(),
            other => vec![other],
        }
    }

    /// Collapses a list of errors into one: `Ok` when empty, the error itself
    /// when there is exactly one, `Multiple` otherwise.
    pub fn combine(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
