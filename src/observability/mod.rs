//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! cache / scheduler / breaker / retries / poller produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (in-process counters + metrics facade)
//!
//! Consumers:
//!     → PollGuard::metrics() snapshot (UI / diagnostics)
//!     → whatever exporter the host installs on the metrics facade
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use metrics::{GuardMetrics, PerformanceMetrics};
