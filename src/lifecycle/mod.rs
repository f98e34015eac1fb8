//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (listener.rs):
//!     startup order → remaining servers → supervisor task
//!
//! Supervision (listener.rs):
//!     server error  → aggregated stream
//!     server closed → backoff → relisten
//!
//! Shutdown (listener.rs):
//!     mark draining → shutdown order → remaining servers → cancel supervisor
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → owning service calls Listener::shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup and shutdown apply to the named prefix only
//! - Shutdown has one deadline shared by every server

pub mod listener;
pub mod signals;

pub use listener::{Listener, ListenerBuilder, DEFAULT_FULL_SHUTDOWN_DURATION};
pub use signals::shutdown_signal;
