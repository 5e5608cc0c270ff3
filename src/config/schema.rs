//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard
//! core and the bundled poller binary. All types derive Serde traits for
//! deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Response cache settings.
    pub cache: CacheConfig,

    /// Circuit breaker settings, applied to every circuit.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Polling defaults.
    pub polling: PollingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Read-only status API.
    pub admin: AdminConfig,

    /// Endpoints polled by the bundled binary.
    pub targets: Vec<TargetConfig>,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached entries before eviction.
    pub max_entries: usize,

    /// TTL used when a caller does not pass one, in milliseconds.
    pub default_ttl_ms: u64,

    /// How often expired entries are swept, in seconds.
    pub cleanup_interval_secs: u64,

    /// Number of producer durations kept for the response-time average.
    pub response_window: usize,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            default_ttl_ms: 30_000,
            cleanup_interval_secs: 60,
            response_window: 100,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Probe calls allowed through a half-open circuit.
    pub half_open_requests: u32,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_requests: 1,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay, in milliseconds.
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1_000,
        }
    }
}

/// Polling defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval used by targets that do not set their own, in seconds.
    pub default_interval_secs: u64,

    /// Deadline for one upstream request, in seconds. A round that stalls
    /// past it fails as a network timeout.
    pub request_timeout_secs: u64,
}

impl PollingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 60,
            request_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Status API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the status API.
    pub enabled: bool,

    /// Bearer token required on every request when set.
    pub api_key: Option<String>,

    /// Status API bind address.
    pub bind_address: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl AdminConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 5,
        }
    }
}

/// A polled endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Consumer id and cache key.
    pub name: String,

    /// URL fetched on every tick.
    pub url: String,

    /// Polling interval override in seconds.
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Cache TTL override in milliseconds.
    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// Cycle through array items one per report instead of showing a count.
    #[serde(default)]
    pub rotate: bool,
}
