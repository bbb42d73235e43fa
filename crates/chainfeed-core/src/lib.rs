//! chainfeed-core — foundation types for ChainFeed.
//!
//! # Overview
//!
//! ChainFeed talks to a blockchain data service over persistent WebSocket
//! connections: one shared connection for request/response traffic and one
//! dedicated connection per streaming call. The core crate defines:
//!
//! - [`envelope`] — JSON-RPC 2.0 envelope and the [`Frame`] codec
//! - [`TransportError`] / [`ErrorKind`] — failure taxonomy
//! - [`RpcTransport`] — the async request/response trait
//! - [`ReconnectPolicy`] — bounded linear or exponential backoff
//! - [`ClientConfig`] — endpoints, timeouts and stream options
//! - [`StreamRequest`] — streaming call descriptor and URL builder
//! - [`logging`] — tracing subscriber setup

pub mod backoff;
pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod query;
pub mod transport;

pub use backoff::{BackoffSchedule, ReconnectConfig, ReconnectPolicy};
pub use config::{ClientConfig, StreamOptions};
pub use envelope::{DecodeError, Frame, JsonRpcError, JsonRpcRequest};
pub use error::{ErrorKind, TransportError};
pub use query::{StreamRequest, NO_RATE_LIMIT};
pub use transport::{ConnectionState, ConnectionStatus, RpcTransport};
