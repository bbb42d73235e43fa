//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectConfig;
use crate::error::TransportError;

/// Default endpoint for the shared request/response connection.
pub const DEFAULT_ENDPOINT: &str = "wss://api.chainfeed.io/ws";
/// Default base endpoint for streaming sessions.
pub const DEFAULT_STREAM_ENDPOINT: &str = "wss://api.chainfeed.io/stream";

/// Per-stream delivery options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Delivery buffer bound; `None` buffers without limit and never stalls
    /// the socket reader.
    #[serde(default)]
    pub buffer: Option<usize>,
    /// Skip frames that fail to decode instead of ending the stream.
    #[serde(default = "bool_true")]
    pub skip_malformed: bool,
    /// Redial policy after an established stream drops. Off by default.
    #[serde(default = "ReconnectConfig::disabled")]
    pub reconnect: ReconnectConfig,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer: None,
            skip_malformed: true,
            reconnect: ReconnectConfig::disabled(),
        }
    }
}

impl StreamOptions {
    pub fn with_buffer(mut self, capacity: usize) -> Self {
        self.buffer = Some(capacity);
        self
    }

    pub fn with_skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Shared connection URL (`ws://` or `wss://`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Base URL that stream queries are appended to.
    #[serde(default = "default_stream_endpoint")]
    pub stream_endpoint: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Per-call timeout; `None` waits indefinitely.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub stream: StreamOptions,
    /// Capacity of the unsolicited-frame broadcast channel.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_endpoint() -> String { DEFAULT_ENDPOINT.into() }
fn default_stream_endpoint() -> String { DEFAULT_STREAM_ENDPOINT.into() }
fn default_request_timeout_ms() -> Option<u64> { Some(30_000) }
fn default_notification_capacity() -> usize { 256 }
fn bool_true() -> bool { true }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            stream_endpoint: default_stream_endpoint(),
            reconnect: ReconnectConfig::default(),
            request_timeout_ms: default_request_timeout_ms(),
            stream: StreamOptions::default(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl ClientConfig {
    /// Config pointing both connections at the given URLs.
    pub fn new(endpoint: impl Into<String>, stream_endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream_endpoint: stream_endpoint.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON config document. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, TransportError> {
        serde_json::from_str(s).map_err(|e| TransportError::InvalidRequest(format!("config: {e}")))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_stream_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.stream_endpoint = endpoint.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_stream_options(mut self, stream: StreamOptions) -> Self {
        self.stream = stream;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
