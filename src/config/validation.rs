//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, intervals, capacities > 0)
//! - Check targets: unique names, parsable URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GuardConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("target #{index} has an empty name")]
    EmptyTargetName { index: usize },

    #[error("target '{0}' is defined more than once")]
    DuplicateTarget(String),

    #[error("target '{name}' has an invalid url '{url}': {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },

    #[error("target '{0}' has a zero polling interval")]
    ZeroInterval(String),

    #[error("{field} '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let nonzero = [
        ("cache.max_entries", config.cache.max_entries as u64),
        ("cache.cleanup_interval_secs", config.cache.cleanup_interval_secs),
        ("cache.response_window", config.cache.response_window as u64),
        (
            "circuit_breaker.failure_threshold",
            u64::from(config.circuit_breaker.failure_threshold),
        ),
        (
            "circuit_breaker.half_open_requests",
            u64::from(config.circuit_breaker.half_open_requests),
        ),
        ("polling.default_interval_secs", config.polling.default_interval_secs),
        ("polling.request_timeout_secs", config.polling.request_timeout_secs),
        ("admin.request_timeout_secs", config.admin.request_timeout_secs),
    ];
    for (field, value) in nonzero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            base: config.retries.base_delay_ms,
            max: config.retries.max_delay_ms,
        });
    }

    let addresses = [
        (
            config.observability.metrics_enabled,
            "observability.metrics_address",
            &config.observability.metrics_address,
        ),
        (config.admin.enabled, "admin.bind_address", &config.admin.bind_address),
    ];
    for (enabled, field, value) in addresses {
        if enabled && value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for (index, target) in config.targets.iter().enumerate() {
        if target.name.trim().is_empty() {
            errors.push(ValidationError::EmptyTargetName { index });
            continue;
        }
        if !seen.insert(target.name.as_str()) {
            errors.push(ValidationError::DuplicateTarget(target.name.clone()));
        }
        if let Err(e) = Url::parse(&target.url) {
            errors.push(ValidationError::InvalidUrl {
                name: target.name.clone(),
                url: target.url.clone(),
                reason: e.to_string(),
            });
        }
        if target.interval_secs == Some(0) {
            errors.push(ValidationError::ZeroInterval(target.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
