//! Per-consumer state.
//!
//! # Lifecycle
//! ```text
//! get_or_create / begin_polling   → record exists (lazy defaults)
//! set_polling_handle              → record owns a repeating timer
//! complete / record_*             → last result, error, attempts updated
//! clear_state                     → timer cancelled, record gone
//! ```
//!
//! Records never expire on their own.

pub mod action;
pub mod store;

pub use action::ActionState;
pub use store::ActionStateStore;
