//! Error classification.
//!
//! # Responsibilities
//! - Map any raw upstream failure onto the fixed [`ErrorKind`] taxonomy
//! - Decide retryability once, at the executor boundary
//! - Pull an explicit retry-after delay out of rate-limit responses
//!
//! # Precedence
//! ```text
//! already classified        → unchanged
//! network code / text       → Network        (retryable)
//! 401 / 403 / auth text     → Authentication
//! 429 / rate-limit text     → RateLimit      (retryable)
//! 400..600                  → ApiError       (retryable iff >= 500)
//! configuration text        → Configuration
//! anything else             → Unknown
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use crate::error::{ClassifiedError, ErrorKind, RawError, UpstreamError};

/// Delay used for rate limits without a usable retry-after header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

const NETWORK_CODES: &[&str] = &[
    "ECONNREFUSED",
    "ENOTFOUND",
    "ETIMEDOUT",
    "ECONNRESET",
    "EAI_AGAIN",
];

const NETWORK_PATTERNS: &[&str] = &[
    "connection refused",
    "enotfound",
    "dns error",
    "timed out",
    "connection reset",
];

const AUTH_PATTERNS: &[&str] = &["unauthorized", "forbidden", "authentication"];

const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "too many requests"];

const CONFIG_PATTERNS: &[&str] = &[
    "invalid configuration",
    "missing required",
    "invalid url",
    "invalid project",
];

/// Classifier with per-kind user message overrides.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    messages: HashMap<ErrorKind, String>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the user message produced for `kind`.
    pub fn with_message(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.messages.insert(kind, message.into());
        self
    }

    /// Classify a raw error. Pure and total.
    pub fn classify(&self, raw: impl Into<RawError>) -> ClassifiedError {
        match raw.into() {
            RawError::Classified(err) => err,
            RawError::Upstream(err) => {
                let classified = classify_upstream(&err);
                match self.messages.get(&classified.kind()) {
                    Some(message) => classified.with_user_message(message.clone()),
                    None => classified,
                }
            }
        }
    }
}

/// Classify with the default user messages.
pub fn classify(raw: impl Into<RawError>) -> ClassifiedError {
    match raw.into() {
        RawError::Classified(err) => err,
        RawError::Upstream(err) => classify_upstream(&err),
    }
}

fn classify_upstream(err: &UpstreamError) -> ClassifiedError {
    let message = err.message.to_lowercase();
    let mentions = |patterns: &[&str]| patterns.iter().any(|p| message.contains(p));

    let classified = if is_network(err, &message) {
        ClassifiedError::new(ErrorKind::Network, true)
    } else if matches!(err.status, Some(401 | 403)) || mentions(AUTH_PATTERNS) {
        ClassifiedError::new(ErrorKind::Authentication, false)
    } else if err.status == Some(429) || mentions(RATE_LIMIT_PATTERNS) {
        ClassifiedError::new(ErrorKind::RateLimit, true)
            .with_retry_after(retry_after(err).unwrap_or(DEFAULT_RETRY_AFTER))
    } else if let Some(status @ 400..=599) = err.status {
        ClassifiedError::new(ErrorKind::ApiError, status >= 500)
    } else if mentions(CONFIG_PATTERNS) {
        ClassifiedError::new(ErrorKind::Configuration, false)
    } else {
        ClassifiedError::new(ErrorKind::Unknown, false)
    };

    let classified = match err.status {
        Some(status) => classified.with_status(status),
        None => classified,
    };
    classified.with_details(json!({
        "message": err.message,
        "code": err.code,
    }))
}

fn is_network(err: &UpstreamError, message: &str) -> bool {
    if let Some(code) = err.code.as_deref() {
        if NETWORK_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
            return true;
        }
    }
    // A response arrived, so the transport worked.
    err.status.is_none() && NETWORK_PATTERNS.iter().any(|p| message.contains(p))
}

/// Seconds from a `Retry-After` header. HTTP-date values are ignored.
fn retry_after(err: &UpstreamError) -> Option<Duration> {
    let value = err.header("retry-after")?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
