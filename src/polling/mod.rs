//! Periodic consumers.
//!
//! # Data Flow
//! ```text
//! TimerPort tick
//!     → Round::fire (skip if previous round outstanding)
//!         → tick() future (usually PollGuard::fetch)
//!     → ActionStateStore::complete (generation checked)
//! ```

pub mod poller;

pub use poller::Poller;
