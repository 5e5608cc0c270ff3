//! pollguard: resilience core for status pollers.
//!
//! Sits between periodic consumers (pipeline, pull request, build and
//! release pollers) and a slow, rate-limited upstream API.
//!
//! ```text
//!   consumer tick ──▶ polling ──▶ guard::fetch
//!                                    │
//!                     ┌──────────────┼──────────────────────┐
//!                     ▼              ▼                      ▼
//!                   cache ──▶ resilience::retries ──▶ circuit_breaker ──▶ upstream op
//!                                    │
//!                           resilience::classify
//!                                    │
//!   UI reads ◀── state (last result / classified error / breaker open)
//! ```
//!
//! Cross-cutting: `timer` (host clock), `scheduling` (throttle, debounce),
//! `config`, `observability`. `admin` serves a read-only status API and
//! `upstream` provides the HTTP probe used by the bundled binary.

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod observability;
pub mod polling;
pub mod resilience;
pub mod scheduling;
pub mod state;
pub mod timer;
pub mod upstream;

pub use config::GuardConfig;
pub use error::{
    BreakerOpen, ClassifiedError, ErrorKind, GuardError, GuardResult, Outcome, UpstreamError,
};
pub use guard::PollGuard;
pub use timer::{TimerHandle, TimerPort, TokioTimer};
