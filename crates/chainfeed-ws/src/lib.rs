//! chainfeed-ws — WebSocket transport for ChainFeed.
//!
//! # Features
//! - One shared connection for request/response and fire-and-forget traffic
//! - Auto-reconnect with a bounded attempt budget (linear or exponential)
//! - Messages queued while disconnected are flushed in FIFO order on open
//! - Responses matched to calls by id, in any arrival order
//! - Pending calls fail with `ConnectionLost` when the socket drops
//! - Independent streaming sessions, each on a dedicated connection

pub mod client;
mod connection;
pub mod correlator;
pub mod queue;
pub mod stream;

pub use client::WsRpcClient;
pub use correlator::{Correlator, RequestIds, Settled};
pub use queue::{FlushReport, OutboundQueue, QueuedMessage};
pub use stream::{open as open_stream, StreamHandle};
