//! Gateway error types

use cord_common::ClientError;

/// Errors raised by a gateway connection
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed ({code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Malformed frame: {0}")]
    Decode(String),

    #[error("Gateway is shutting down")]
    Shutdown,
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<GatewayError> for ClientError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Decode(message) => Self::ProtocolViolation(message),
            GatewayError::Shutdown => Self::Closed,
            other => Self::ConnectionLost(other.to_string()),
        }
    }
}
