//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! host:port, unix path or pre-bound socket
//!     → listener.rs (bind once, clone per serve attempt)
//!     → closable.rs (every accepted stream can be severed at the deadline)
//!     → tls.rs (optional TLS termination)
//!     → protocol engine (HTTP or gRPC)
//! ```

pub mod closable;
pub mod listener;
pub mod tls;

pub use closable::Closable;
pub use listener::{Address, Socket};
pub use tls::SecurityContext;
