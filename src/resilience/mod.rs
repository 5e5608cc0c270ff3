//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded upstream call:
//!     → retries.rs (loop, classify failures, back off)
//!         → circuit_breaker.rs (fail fast when open, count outcomes)
//!             → upstream operation
//!     → classify.rs (raw error → ClassifiedError, once per failure)
//!     → backoff.rs (exponential delay + jitter, capped)
//! ```
//!
//! # Design Decisions
//! - Callers own deadlines; nothing here imposes a timeout
//! - Breaker-open is reported separately from classified failures
//! - Circuit breaker prevents hammering a failing upstream

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod retries;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use classify::{classify, ErrorClassifier, DEFAULT_RETRY_AFTER};
pub use retries::{RetryExecutor, RetryPolicy};
