//! Error taxonomy and call outcomes.
//!
//! # Responsibilities
//! - Describe the raw failure shape an upstream operation hands back
//! - Hold the classified, user-facing form of a failure
//! - Keep "circuit open, never attempted" apart from "attempted and failed"
//!
//! # Design Decisions
//! - `ClassifiedError` is immutable once built; builders consume `self`
//! - Breaker-open is its own type, never folded into the taxonomy
//! - Everything is `Clone` so coalesced cache waiters can share one result

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Fixed taxonomy for upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Authentication,
    RateLimit,
    Configuration,
    ApiError,
    Unknown,
}

impl ErrorKind {
    /// Message shown to the user when nothing more specific was supplied.
    pub fn default_user_message(self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error. Check your connection.",
            ErrorKind::Authentication => "Authentication failed. Check your access token.",
            ErrorKind::RateLimit => "Rate limit reached. Retrying shortly.",
            ErrorKind::Configuration => "Configuration error. Check your settings.",
            ErrorKind::ApiError => "The service returned an error.",
            ErrorKind::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Configuration => "configuration",
            ErrorKind::ApiError => "api_error",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failure normalized into the taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{kind}: {user_message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    status_code: Option<u16>,
    retryable: bool,
    user_message: String,
    details: Option<serde_json::Value>,
    retry_after: Option<Duration>,
}

impl ClassifiedError {
    /// Build an error of `kind` with the kind's default user message.
    pub fn new(kind: ErrorKind, retryable: bool) -> Self {
        Self {
            kind,
            status_code: None,
            retryable,
            user_message: kind.default_user_message().to_string(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Explicit delay the upstream asked for (rate limits).
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    /// Delay taken from the upstream response, if one was sent.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Raw failure reported by an upstream client.
///
/// Mirrors what HTTP clients typically expose: an optional status, an
/// optional low-level error code (`ECONNREFUSED`, ...), a message and the
/// response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    headers: HashMap<String, String>,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a response header. Names are matched case-insensitively.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Anything the classifier accepts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RawError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Classified(#[from] ClassifiedError),
}

/// The circuit for an operation is open; the operation was not invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("circuit '{circuit}' is open after {consecutive_failures} failures, next attempt in {retry_in:?}")]
pub struct BreakerOpen {
    pub circuit: String,
    pub consecutive_failures: u32,
    pub retry_in: Duration,
}

/// Failure of a single attempt, before classification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptError {
    #[error(transparent)]
    BreakerOpen(#[from] BreakerOpen),
    #[error(transparent)]
    Failed(#[from] RawError),
}

impl From<UpstreamError> for AttemptError {
    fn from(err: UpstreamError) -> Self {
        AttemptError::Failed(RawError::Upstream(err))
    }
}

impl From<ClassifiedError> for AttemptError {
    fn from(err: ClassifiedError) -> Self {
        AttemptError::Failed(RawError::Classified(err))
    }
}

/// What callers of the guarded pipeline see on failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    /// Request was not attempted because of sustained prior failure.
    #[error(transparent)]
    BreakerOpen(BreakerOpen),

    /// Request was attempted (possibly several times) and failed.
    #[error(transparent)]
    Failed(ClassifiedError),
}

impl GuardError {
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, GuardError::BreakerOpen(_))
    }

    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            GuardError::Failed(err) => Some(err),
            GuardError::BreakerOpen(_) => None,
        }
    }

    /// Text suitable for a small status display.
    pub fn user_message(&self) -> &str {
        match self {
            GuardError::Failed(err) => err.user_message(),
            GuardError::BreakerOpen(_) => "Service unavailable. Waiting before retrying.",
        }
    }
}

/// Result type for guarded upstream calls.
pub type GuardResult<T> = Result<T, GuardError>;

/// Tagged view of a finished guarded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    /// Attempted, failed with a retryable error and ran out of retries.
    Retryable(ClassifiedError),
    /// Attempted and failed with an error retrying cannot fix.
    Fatal(ClassifiedError),
    BreakerOpen(BreakerOpen),
}

impl<T> From<GuardResult<T>> for Outcome<T> {
    fn from(result: GuardResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(GuardError::BreakerOpen(open)) => Outcome::BreakerOpen(open),
            Err(GuardError::Failed(err)) if err.retryable() => Outcome::Retryable(err),
            Err(GuardError::Failed(err)) => Outcome::Fatal(err),
        }
    }
}
