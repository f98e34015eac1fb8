//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Server stream closes while the listener is active:
//!     → RestartPolicy::on_exit (quick exit or stable run?)
//!     → RestartPolicy::delay (exponential backoff with jitter)
//!     → supervisor relistens the server
//! ```
//!
//! # Design Decisions
//! - A crashing server is always relistened eventually unless it opted out
//!   of restarts; backoff only paces it
//! - Jitter keeps servers that fail together from relistening in lockstep

pub mod backoff;

pub use backoff::{calculate_backoff, RestartPolicy};
