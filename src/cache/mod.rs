//! Upstream response cache.
//!
//! # Data Flow
//! ```text
//! get_or_compute(key)
//!     → live entry?       → hit_count += 1, return value
//!     → in flight?        → await the shared computation
//!     → otherwise         → run producer once, store on success
//! ```
//!
//! TTL is checked against the clock on read. Expired entries linger until
//! `cleanup()` runs (see `PollGuard::spawn_maintenance`).

pub mod entry;
pub mod store;

pub use entry::CacheEntry;
pub use store::ResponseCache;
