//! Outbound queue for the shared connection.
//!
//! Envelopes that cannot be written yet wait here in FIFO order. The
//! connection task drains the queue as soon as a socket opens, before it
//! looks at any newer command.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::{Sink, SinkExt};
use tokio_tungstenite::tungstenite::Message;

use chainfeed_core::error::TransportError;

use crate::correlator::Correlator;

/// An encoded envelope awaiting transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Correlation id when a caller waits for the response.
    pub id: Option<u64>,
    pub text: String,
}

impl QueuedMessage {
    pub fn call(id: u64, text: String) -> Self {
        Self { id: Some(id), text }
    }

    pub fn notification(text: String) -> Self {
        Self { id: None, text }
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
    /// Calls whose caller gave up before the socket opened.
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: QueuedMessage) {
        self.items.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop everything queued, returning it so waiters can be told.
    pub fn clear(&mut self) -> Vec<QueuedMessage> {
        self.items.drain(..).collect()
    }

    /// Write every queued message head to tail.
    ///
    /// A failed write is reported to that message's waiter as a network error
    /// and the flush moves on to the next message.
    pub async fn flush<S>(&mut self, sink: &mut S, correlator: &mut Correlator) -> FlushReport
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
    {
        let mut report = FlushReport::default();
        while let Some(message) = self.items.pop_front() {
            if let Some(id) = message.id {
                if correlator.is_abandoned(id) {
                    correlator.remove(id);
                    report.skipped += 1;
                    continue;
                }
            }
            match sink.send(Message::Text(message.text)).await {
                Ok(()) => {
                    report.sent += 1;
                    if let Some(id) = message.id {
                        correlator.mark_in_flight(id);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(id = ?message.id, error = %e, "failed to transmit queued message");
                    if let Some(id) = message.id {
                        correlator.reject(id, TransportError::Network(format!("send failed: {e}")));
                    }
                }
            }
        }
        report
    }
}
