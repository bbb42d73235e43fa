//! Streaming call descriptors and their connection URLs.
//!
//! A stream is opened by appending a query string to the stream endpoint:
//! `id=<call name>`, then every scalar parameter, then `cusRateLimit`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::TransportError;

/// `cusRateLimit` value meaning "no custom rate limit".
pub const NO_RATE_LIMIT: i64 = -1;

const RESERVED_KEYS: [&str; 2] = ["id", "cusRateLimit"];

/// A streaming call: its name, scalar parameters and optional rate limit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamRequest {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub cus_rate_limit: Option<i64>,
}

impl StreamRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add one parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Merge the fields of a JSON object into the parameters.
    /// Non-object payloads are rejected.
    pub fn with_payload(mut self, payload: Value) -> Result<Self, TransportError> {
        match payload {
            Value::Object(map) => {
                self.params.extend(map);
                Ok(self)
            }
            other => Err(TransportError::InvalidRequest(format!(
                "stream payload must be an object, got {other}"
            ))),
        }
    }

    pub fn with_rate_limit(mut self, limit: i64) -> Self {
        self.cus_rate_limit = Some(limit);
        self
    }

    /// Query pairs in wire order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.params.len() + 2);
        pairs.push(("id".to_string(), self.name.clone()));
        for (key, value) in &self.params {
            if RESERVED_KEYS.contains(&key.as_str()) {
                tracing::debug!(key = %key, "ignoring reserved stream parameter");
                continue;
            }
            match scalar_to_string(value) {
                Some(s) => pairs.push((key.clone(), s)),
                None => tracing::debug!(key = %key, "skipping non-scalar stream parameter"),
            }
        }
        pairs.push((
            "cusRateLimit".to_string(),
            self.cus_rate_limit.unwrap_or(NO_RATE_LIMIT).to_string(),
        ));
        pairs
    }

    /// Full connection URL for this stream on `base`.
    pub fn to_url(&self, base: &str) -> Result<Url, TransportError> {
        if self.name.is_empty() {
            return Err(TransportError::InvalidRequest("stream name is empty".into()));
        }
        let mut url = parse_ws_url(base)?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in self.query_pairs() {
                query.append_pair(&key, &value);
            }
        }
        Ok(url)
    }
}

/// Parse and validate a `ws://` / `wss://` URL.
pub fn parse_ws_url(s: &str) -> Result<Url, TransportError> {
    let url = Url::parse(s).map_err(|e| TransportError::InvalidRequest(format!("{s}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(TransportError::InvalidRequest(format!(
            "unsupported URL scheme {other:?} (expected ws or wss)"
        ))),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
