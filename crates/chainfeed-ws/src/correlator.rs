//! Request correlation for the shared connection.
//!
//! Each call gets a fresh id and exactly one waiter. The waiter is settled by
//! the first response frame carrying that id, by a transmit failure, or by
//! connection teardown. Later frames with the same id are ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::oneshot;

use chainfeed_core::envelope::Frame;
use chainfeed_core::error::TransportError;

/// Single-shot channel a caller waits on.
pub type Responder = oneshot::Sender<Result<Value, TransportError>>;

/// Monotonic id source. Ids start at 1 and never repeat within a client.
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl Default for RequestIds {
    fn default() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

struct PendingRequest {
    method: String,
    responder: Responder,
    /// Written to a socket; only these are failed when that socket drops.
    in_flight: bool,
}

/// What happened to an inbound frame.
#[derive(Debug, PartialEq)]
pub enum Settled {
    /// A waiter received the outcome.
    Resolved(u64),
    /// No waiter for this id (already settled, cancelled or never issued).
    Unmatched(u64),
    /// Not a response; hand it to whoever listens for pushes.
    Unsolicited(Value),
}

/// Pending-request table. Owned by the connection task, never shared.
#[derive(Default)]
pub struct Correlator {
    pending: HashMap<u64, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new call. A duplicate id is refused and its responder told so.
    pub fn register(&mut self, id: u64, method: impl Into<String>, responder: Responder) -> bool {
        self.sweep_abandoned();
        if self.pending.contains_key(&id) {
            let _ = responder.send(Err(TransportError::InvalidRequest(format!(
                "request id {id} is already in flight"
            ))));
            return false;
        }
        self.pending.insert(
            id,
            PendingRequest {
                method: method.into(),
                responder,
                in_flight: false,
            },
        );
        true
    }

    pub fn mark_in_flight(&mut self, id: u64) {
        if let Some(entry) = self.pending.get_mut(&id) {
            entry.in_flight = true;
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    /// `true` if nobody is waiting on `id` any more: never registered,
    /// already settled, or the caller dropped its future.
    pub fn is_abandoned(&self, id: u64) -> bool {
        self.pending
            .get(&id)
            .map_or(true, |entry| entry.responder.is_closed())
    }

    /// Route a decoded frame to its waiter.
    pub fn settle(&mut self, frame: Frame) -> Settled {
        let (id, outcome) = match frame {
            Frame::Unsolicited(value) => return Settled::Unsolicited(value),
            Frame::Response { id, result: Some(result) } => (id, Ok(result)),
            Frame::Response { id, result: None } => (
                id,
                Err(TransportError::InvalidResponse(format!(
                    "response {id} has neither result nor error"
                ))),
            ),
            Frame::ResponseError { id, error } => (id, Err(TransportError::Rpc(error))),
        };
        match self.pending.remove(&id) {
            Some(entry) => {
                tracing::trace!(id, method = %entry.method, ok = outcome.is_ok(), "response settled");
                let _ = entry.responder.send(outcome);
                Settled::Resolved(id)
            }
            None => Settled::Unmatched(id),
        }
    }

    /// Fail one waiter.
    pub fn reject(&mut self, id: u64, err: TransportError) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                let _ = entry.responder.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Forget a waiter without notifying it (its caller already gave up).
    pub fn remove(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fail every call already written to the socket that just dropped.
    pub fn fail_in_flight(&mut self, err: impl Fn() -> TransportError) -> usize {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.in_flight)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.reject(*id, err());
        }
        ids.len()
    }

    /// Fail every waiter.
    pub fn fail_all(&mut self, err: impl Fn() -> TransportError) -> usize {
        let n = self.pending.len();
        for (_, entry) in self.pending.drain() {
            let _ = entry.responder.send(Err(err()));
        }
        n
    }

    /// Drop waiters whose caller stopped awaiting.
    pub fn sweep_abandoned(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, entry| !entry.responder.is_closed());
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
