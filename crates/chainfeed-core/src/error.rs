//! Transport-level error types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{DecodeError, JsonRpcError};

/// Coarse failure category, used by callers to classify what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NetworkError,
    InvalidResponse,
    Timeout,
    Unauthorized,
    RateLimited,
    InvalidRequest,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::Timeout => "TIMEOUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidRequest => "INVALID_REQUEST",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during a transport operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// Connect, send or receive failed at the socket level.
    #[error("network error: {0}")]
    Network(String),

    /// The shared connection dropped while the call was in flight.
    #[error("connection lost before a response arrived")]
    ConnectionLost,

    /// Reconnect budget spent; an explicit `connect()` is required.
    #[error("connection abandoned after {attempts} failed reconnect attempts")]
    ConnectionExhausted { attempts: u32 },

    /// Frame was malformed or lacked an expected field.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Error object returned by the server.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// No response within the configured request timeout.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The call could not be encoded or was rejected before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Coarse category of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::ConnectionLost | Self::ConnectionExhausted { .. } => {
                ErrorKind::NetworkError
            }
            Self::InvalidResponse(_) => ErrorKind::InvalidResponse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Rpc(err) => match err.code {
                -32602..=-32600 => ErrorKind::InvalidRequest,
                401 | 403 => ErrorKind::Unauthorized,
                429 => ErrorKind::RateLimited,
                _ => ErrorKind::InvalidResponse,
            },
        }
    }

    /// Structured data attached by the server, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Rpc(err) => err.data.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::ConnectionLost | Self::Timeout { .. }
        ) || self.kind() == ErrorKind::RateLimited
    }
}

impl From<DecodeError> for TransportError {
    fn from(err: DecodeError) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rpc(code: i64) -> TransportError {
        TransportError::Rpc(JsonRpcError {
            code,
            message: "x".into(),
            data: Some(json!({"retry_after": 3})),
        })
    }

    #[test]
    fn kinds() {
        assert_eq!(TransportError::ConnectionLost.kind(), ErrorKind::NetworkError);
        assert_eq!(
            TransportError::ConnectionExhausted { attempts: 5 }.kind(),
            ErrorKind::NetworkError
        );
        assert_eq!(rpc(-32601).kind(), ErrorKind::InvalidRequest);
        assert_eq!(rpc(401).kind(), ErrorKind::Unauthorized);
        assert_eq!(rpc(429).kind(), ErrorKind::RateLimited);
        assert_eq!(rpc(1).kind(), ErrorKind::InvalidResponse);
    }

    #[test]
    fn server_data_is_exposed() {
        assert_eq!(rpc(429).data(), Some(&json!({"retry_after": 3})));
        assert!(TransportError::ConnectionLost.data().is_none());
    }

    #[test]
    fn retryable() {
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
        assert!(rpc(429).is_retryable());
        assert!(!rpc(1).is_retryable());
        assert!(!TransportError::ConnectionExhausted { attempts: 5 }.is_retryable());
    }

    #[test]
    fn kind_serializes_screaming() {
        let s = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(s, "\"RATE_LIMITED\"");
        assert_eq!(ErrorKind::NetworkError.to_string(), "NETWORK_ERROR");
    }

    #[test]
    fn decode_error_becomes_invalid_response() {
        let err: TransportError = DecodeError::NotAnObject.into();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }
}
