//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber once per process
//! - Take the level from configuration, letting `RUST_LOG` override it
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Repeated initialization is ignored so tests and embedding services can
//!   call `init` freely

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the configured level parses.
const FALLBACK_FILTER: &str = "info";

/// Initialize the tracing subscriber with `level` as the default filter.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));

    if tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn default_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    if level.is_empty() {
        return FALLBACK_FILTER.to_string();
    }
    format!("serverset={level},tower_http={level},{FALLBACK_FILTER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_level_falls_back() {
        assert_eq!(default_directives("  "), "info");
    }

    #[test]
    fn level_applies_to_crate_and_http_layers() {
        assert_eq!(
            default_directives("DEBUG"),
            "serverset=debug,tower_http=debug,info"
        );
    }

    #[test]
    fn init_twice_is_harmless() {
        init("info");
        init("debug");
    }
}
