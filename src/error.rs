//! Error taxonomy for the API client core
//!
//! ## Table of Contents
//! - **ErrorKind**: Closed set of failure classifications
//! - **ApiError**: Classified error carried through the whole pipeline
//! - **Result**: Type alias for `Result<T, ApiError>`
//!
//! Every failure that reaches a caller is exactly one `ApiError`; raw
//! transport or serialization errors never escape the pipeline unclassified.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Closed classification of every failure the pipeline can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Connection-level failure (DNS, refused, reset)
    Network,
    /// Per-attempt deadline elapsed, or the call was cancelled
    Timeout,
    /// HTTP 401/403
    Auth,
    /// HTTP 400/422
    Validation,
    /// HTTP 404
    NotFound,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    Server,
    /// Circuit breaker rejected the call without attempting it
    CircuitOpen,
    /// Anything that does not fit the taxonomy (includes parse failures)
    Unknown,
}

impl ErrorKind {
    /// Transient kinds the retry executor may recover from
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Server
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Auth => "AUTH",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::Server => "SERVER",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Classified error for all pipeline failures
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct ApiError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// Structured payload extracted from an error response body
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            details: None,
        }
    }

    /// Attach an HTTP status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a structured payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, msg)
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    /// Create an auth error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, msg)
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    /// Create a circuit-open error
    pub fn circuit_open(endpoint: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker open for {}", endpoint),
        )
    }

    /// Create an unknown error
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, msg)
    }

    /// Classify an HTTP response status into an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Auth,
            400 | 422 => ErrorKind::Validation,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimit,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, message).with_status(status)
    }

    /// Whether the retry executor may recover from this error
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Log the error at a level matching how alarming it is.
    ///
    /// Auth failures are expected traffic (guests poking authenticated
    /// endpoints) and log at info; everything else logs at warn.
    pub fn log(&self, endpoint: &str) {
        match self.kind {
            ErrorKind::Auth => {
                info!(endpoint = %endpoint, status = ?self.status, "Auth required: {}", self.message)
            }
            _ => {
                warn!(endpoint = %endpoint, kind = %self.kind, status = ?self.status, "{}", self.message)
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::network(err.to_string())
        } else {
            Self::unknown(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::unknown(format!("JSON parse failure: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::network(err.to_string())
    }
}
