//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Servers and the listener produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (lifecycle gauges and counters)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape of the pprof server's /metrics
//! ```

pub mod logging;
pub mod metrics;
