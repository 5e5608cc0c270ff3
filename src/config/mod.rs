//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handed to PollGuard::new, split per subsystem
//!
//! watcher.rs (file change) → reload → validated GuardConfig → binary
//!     re-applies the target list; core settings need a restart
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a reload produces a new value
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, CircuitBreakerConfig, GuardConfig, LogFormat, ObservabilityConfig,
    PollingConfig, RetryConfig, TargetConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigWatcher, TargetDiff};
