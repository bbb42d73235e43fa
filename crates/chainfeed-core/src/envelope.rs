//! JSON-RPC 2.0 wire envelope and the frame codec.
//!
//! Outgoing calls are encoded as `{jsonrpc, id, method, params}`. Incoming
//! frames decode into a [`Frame`]: a response correlated by `id`, an error
//! response, or an unsolicited message the server pushed on its own.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::TransportError;

/// Protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to the text form sent over the socket.
    pub fn to_text(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `{id, result}`. `result` is `None` when the field is absent.
    Response { id: u64, result: Option<Value> },
    /// `{id, error}`.
    ResponseError { id: u64, error: JsonRpcError },
    /// Anything that is not a response to one of our calls.
    Unsolicited(Value),
}

impl Frame {
    /// Correlation id, if this frame answers a call.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Response { id, .. } | Self::ResponseError { id, .. } => Some(*id),
            Self::Unsolicited(_) => None,
        }
    }
}

/// Structural problems with an inbound frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame is not valid UTF-8")]
    Utf8,

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("unsupported jsonrpc version {0}")]
    Version(Value),

    #[error("response id is not an unsigned integer: {0}")]
    BadId(Value),

    #[error("malformed error object: {0}")]
    BadError(String),
}

/// Encode an outgoing call.
pub fn encode(id: u64, method: &str, params: Vec<Value>) -> Result<String, TransportError> {
    JsonRpcRequest::new(id, method, params).to_text()
}

/// Decode a text frame.
pub fn decode(text: &str) -> Result<Frame, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::NotAnObject);
    };
    classify(obj)
}

/// Decode a binary frame, which must hold UTF-8 JSON.
pub fn decode_bytes(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::Utf8)?;
    decode(text)
}

fn classify(obj: Map<String, Value>) -> Result<Frame, DecodeError> {
    if let Some(version) = obj.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Err(DecodeError::Version(version.clone()));
        }
    }

    // Requests and notifications from the server carry a method.
    if obj.contains_key("method") {
        return Ok(Frame::Unsolicited(Value::Object(obj)));
    }

    let id = match obj.get("id") {
        None | Some(Value::Null) => return Ok(Frame::Unsolicited(Value::Object(obj))),
        Some(raw) => raw.as_u64().ok_or_else(|| DecodeError::BadId(raw.clone()))?,
    };

    match obj.get("error") {
        Some(Value::Null) | None => Ok(Frame::Response {
            id,
            result: obj.get("result").cloned(),
        }),
        Some(raw) => {
            let error = serde_json::from_value::<JsonRpcError>(raw.clone())
                .map_err(|e| DecodeError::BadError(e.to_string()))?;
            Ok(Frame::ResponseError { id, error })
        }
    }
}
