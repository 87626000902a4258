//! Client error types
//!
//! The error taxonomy shared by the gateway, the REST dispatcher and callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::config::ConfigError;

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionLost,
    AuthenticationFailed,
    RateLimitExceeded,
    RequestRejected,
    Transient,
    ProtocolViolation,
    Config,
    Closed,
    NotFound,
    Internal,
}

/// Client-wide error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Gateway connectivity failed and retries were exhausted
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Token rejected, disallowed intents, or repeated invalid sessions
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded on {route} after {attempts} attempts")]
    RateLimitExceeded {
        route: String,
        attempts: u32,
        retry_after: Option<Duration>,
    },

    /// The server refused the request; `body` carries its error payload
    #[error("Request rejected with status {status}: {body}")]
    RequestRejected { status: u16, body: ApiErrorBody },

    #[error("Transient failure on {route} after {attempts} attempts: {message}")]
    Transient {
        route: String,
        attempts: u32,
        message: String,
    },

    /// A malformed or unexpected frame
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Client is shut down")]
    Closed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Get the coarse classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Self::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::RequestRejected { .. } => ErrorKind::RequestRejected,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::Config(_) => ErrorKind::Config,
            Self::Closed => ErrorKind::Closed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get error code string for logs
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConnectionLost(_) => "CONNECTION_LOST",
            Self::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::RequestRejected { .. } => "REQUEST_REJECTED",
            Self::Transient { .. } => "TRANSIENT",
            Self::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Closed => "CLOSED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation later may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::RateLimitExceeded { .. } | Self::Transient { .. }
        )
    }

    /// Whether the failure cannot be fixed without operator action
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_) | Self::Config(_))
    }

    /// Server error payload, for rejected requests
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiErrorBody> {
        match self {
            Self::RequestRejected { body, .. } => Some(body),
            _ => None,
        }
    }

    /// HTTP status for REST failures
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestRejected { status, .. } => Some(*status),
            Self::RateLimitExceeded { .. } => Some(429),
            _ => None,
        }
    }

    // Helper constructors
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

/// Error payload returned by the REST API
///
/// ```json
/// {"code": 50035, "message": "Invalid Form Body", "errors": {...}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
}

impl ApiErrorBody {
    /// Parse a response body, keeping non-JSON bodies as the message
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_else(|_| Self {
            code: 0,
            message: String::from_utf8_lossy(bytes).into_owned(),
            errors: None,
        })
    }
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
