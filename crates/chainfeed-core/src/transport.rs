//! The `RpcTransport` trait and connection state types.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Snapshot of the shared connection as published by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Automatic reconnect attempts made since the last successful open.
    pub reconnect_attempts: u32,
    /// Reconnect budget spent; only an explicit connect will dial again.
    pub exhausted: bool,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Request/response over some connection.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Issue a call and wait for its raw result.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError>;

    /// Current state of the underlying connection.
    fn state(&self) -> ConnectionState;

    /// The transport's endpoint URL.
    fn url(&self) -> &str;

    /// Convenience: call a method and deserialize the result.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let result = self.request(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| TransportError::InvalidResponse(format!("{method}: {e}")))
    }
}
