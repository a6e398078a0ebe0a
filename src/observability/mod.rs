//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! guards, audit log, handlers
//!     → logging.rs (tracing events, pretty or JSON)
//!     → metrics.rs (counters and histograms, Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line via the trace span
//! - Metrics are cheap (atomic increments) and safe to call before init

pub mod logging;
pub mod metrics;
