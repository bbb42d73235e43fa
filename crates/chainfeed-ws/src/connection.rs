//! Connection manager for the shared WebSocket.
//!
//! A single background task owns the socket, the outbound queue and the
//! pending-request table. Callers talk to it only through [`Command`]s, so
//! every state change happens on one task in the order commands and socket
//! events arrive.
//!
//! ```text
//! Closed --connect--> Connecting --open--> Open
//!   ^                     |                  |
//!   +---- backoff <-------+---- error/close -+
//! ```
//!
//! After `max_attempts` failed automatic reconnects the task parks in a
//! terminal `Closed` state and refuses work until an explicit connect.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainfeed_core::backoff::ReconnectPolicy;
use chainfeed_core::envelope::{self, DecodeError, Frame};
use chainfeed_core::error::TransportError;
use chainfeed_core::transport::{ConnectionState, ConnectionStatus};

use crate::correlator::{Correlator, Responder, Settled};
use crate::queue::{OutboundQueue, QueuedMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Command sent from client handles to the connection task.
pub(crate) enum Command {
    /// Dial if closed; acknowledged once the request is accepted.
    Connect { ack: Option<oneshot::Sender<()>> },
    /// Close the socket, drop queued work and reset the reconnect counter.
    Disconnect { done: oneshot::Sender<()> },
    /// Request/response call.
    Call {
        id: u64,
        method: String,
        text: String,
        responder: Responder,
    },
    /// Fire-and-forget envelope.
    Notify { text: String },
    /// Caller stopped waiting for `id`.
    Cancel { id: u64 },
}

enum Link {
    Idle,
    Dial,
    Backoff(Duration),
    Open { sink: WsSink, source: WsSource },
    Shutdown,
}

pub(crate) struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    notifications: broadcast::Sender<Value>,
    queue: OutboundQueue,
    correlator: Correlator,
    attempts: u32,
    exhausted: bool,
}

impl ConnectionManager {
    pub(crate) fn new(
        url: String,
        policy: ReconnectPolicy,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
        notifications: broadcast::Sender<Value>,
    ) -> Self {
        Self {
            url,
            policy,
            cmd_rx,
            status_tx,
            notifications,
            queue: OutboundQueue::new(),
            correlator: Correlator::new(),
            attempts: 0,
            exhausted: false,
        }
    }

    /// Drive the connection until every client handle is dropped.
    pub(crate) async fn run(mut self) {
        let mut link = Link::Idle;
        loop {
            link = match link {
                Link::Idle => self.idle().await,
                Link::Dial => self.dial().await,
                Link::Backoff(delay) => self.backoff(delay).await,
                Link::Open { sink, source } => self.pump(sink, source).await,
                Link::Shutdown => break,
            };
        }
        self.correlator.fail_all(|| TransportError::ConnectionLost);
        self.queue.clear();
        self.publish(ConnectionState::Closed);
        tracing::debug!(url = %self.url, "connection task stopped");
    }

    fn publish(&self, state: ConnectionState) {
        let next = ConnectionStatus {
            state,
            reconnect_attempts: self.attempts,
            exhausted: self.exhausted,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn idle(&mut self) -> Link {
        self.publish(ConnectionState::Closed);
        match self.cmd_rx.recv().await {
            None => Link::Shutdown,
            Some(Command::Connect { ack }) => {
                self.attempts = 0;
                self.exhausted = false;
                self.publish(ConnectionState::Connecting);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                Link::Dial
            }
            Some(Command::Disconnect { done }) => {
                self.teardown();
                let _ = done.send(());
                Link::Idle
            }
            Some(Command::Cancel { id }) => {
                self.correlator.remove(id);
                Link::Idle
            }
            Some(cmd) if self.exhausted => {
                self.refuse(cmd);
                Link::Idle
            }
            Some(cmd) => {
                self.enqueue(cmd);
                Link::Dial
            }
        }
    }

    async fn dial(&mut self) -> Link {
        self.publish(ConnectionState::Connecting);
        tracing::info!(url = %self.url, attempt = self.attempts, "connecting via WebSocket");

        let connect = tokio_tungstenite::connect_async(self.url.clone());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                res = &mut connect => {
                    return match res {
                        Ok((ws, _)) => self.on_open(ws).await,
                        Err(e) => {
                            tracing::warn!(url = %self.url, error = %e, "WS connect failed");
                            self.on_failure()
                        }
                    };
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Link::Shutdown,
                    Some(Command::Disconnect { done }) => {
                        self.teardown();
                        let _ = done.send(());
                        return Link::Idle;
                    }
                    Some(cmd) => self.absorb(cmd),
                }
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Link {
        self.publish(ConnectionState::Closed);
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Link::Dial,
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Link::Shutdown,
                    Some(Command::Disconnect { done }) => {
                        self.teardown();
                        let _ = done.send(());
                        return Link::Idle;
                    }
                    Some(Command::Connect { ack }) => {
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        return Link::Dial;
                    }
                    Some(cmd) => self.absorb(cmd),
                }
            }
        }
    }

    async fn pump(&mut self, mut sink: WsSink, mut source: WsSource) -> Link {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None => {
                        let _ = sink.close().await;
                        return Link::Shutdown;
                    }
                    Some(Command::Disconnect { done }) => {
                        let _ = sink.close().await;
                        self.teardown();
                        let _ = done.send(());
                        return Link::Idle;
                    }
                    Some(cmd) => {
                        self.absorb(cmd);
                        if !self.queue.is_empty() {
                            let report = self.queue.flush(&mut sink, &mut self.correlator).await;
                            if report.failed > 0 {
                                return self.on_lost();
                            }
                        }
                    }
                },
                msg = source.next() => match msg {
                    None => {
                        tracing::warn!(url = %self.url, "WS stream ended");
                        return self.on_lost();
                    }
                    Some(Err(e)) => {
                        tracing::warn!(url = %self.url, error = %e, "WS receive error");
                        return self.on_lost();
                    }
                    Some(Ok(Message::Text(text))) => self.dispatch(envelope::decode(&text)),
                    Some(Ok(Message::Binary(bytes))) => self.dispatch(envelope::decode_bytes(&bytes)),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(url = %self.url, "WS closed by server");
                        return self.on_lost();
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    /// Handle a command that needs no phase change.
    fn absorb(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { ack } => {
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Cancel { id } => {
                self.correlator.remove(id);
            }
            Command::Disconnect { done } => {
                self.teardown();
                let _ = done.send(());
            }
            cmd => self.enqueue(cmd),
        }
    }

    fn enqueue(&mut self, cmd: Command) {
        match cmd {
            Command::Call {
                id,
                method,
                text,
                responder,
            } => {
                if self.correlator.register(id, method, responder) {
                    self.queue.push(QueuedMessage::call(id, text));
                }
            }
            Command::Notify { text } => self.queue.push(QueuedMessage::notification(text)),
            _ => {}
        }
    }

    fn refuse(&mut self, cmd: Command) {
        let err = TransportError::ConnectionExhausted {
            attempts: self.attempts,
        };
        match cmd {
            Command::Call { responder, .. } => {
                let _ = responder.send(Err(err));
            }
            Command::Notify { .. } => {
                tracing::warn!(url = %self.url, "dropping notification: {err}");
            }
            _ => {}
        }
    }

    async fn on_open(&mut self, ws: WsStream) -> Link {
        tracing::info!(url = %self.url, "WebSocket connected");
        self.attempts = 0;
        self.exhausted = false;

        let (mut sink, source) = ws.split();
        let report = self.queue.flush(&mut sink, &mut self.correlator).await;
        if report.sent + report.failed + report.skipped > 0 {
            tracing::debug!(
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                "flushed outbound queue"
            );
        }
        if report.failed > 0 {
            return self.on_lost();
        }
        self.publish(ConnectionState::Open);
        Link::Open { sink, source }
    }

    fn on_lost(&mut self) -> Link {
        let lost = self.correlator.fail_in_flight(|| TransportError::ConnectionLost);
        if lost > 0 {
            tracing::warn!(url = %self.url, lost, "failed in-flight requests after disconnect");
        }
        self.on_failure()
    }

    fn on_failure(&mut self) -> Link {
        match self.policy.next_delay(self.attempts + 1) {
            Some(delay) => {
                self.attempts += 1;
                tracing::warn!(
                    url = %self.url,
                    attempt = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "WS disconnected, reconnecting"
                );
                Link::Backoff(delay)
            }
            None => {
                self.exhausted = true;
                let attempts = self.attempts;
                tracing::error!(url = %self.url, attempts, "reconnect attempts exhausted");
                self.correlator
                    .fail_all(|| TransportError::ConnectionExhausted { attempts });
                let dropped = self.queue.clear();
                if !dropped.is_empty() {
                    tracing::warn!(dropped = dropped.len(), "discarded queued messages");
                }
                self.publish(ConnectionState::Closed);
                Link::Idle
            }
        }
    }

    fn teardown(&mut self) {
        self.correlator.fail_all(|| TransportError::ConnectionLost);
        self.queue.clear();
        self.attempts = 0;
        self.exhausted = false;
        self.publish(ConnectionState::Closed);
        tracing::info!(url = %self.url, "disconnected");
    }

    fn dispatch(&mut self, decoded: Result<Frame, DecodeError>) {
        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "dropping malformed frame");
                return;
            }
        };
        tracing::trace!(url = %self.url, id = ?frame.id(), "inbound frame");
        match self.correlator.settle(frame) {
            Settled::Resolved(_) => {}
            Settled::Unmatched(id) => {
                tracing::debug!(id, "response for unknown or settled request");
            }
            Settled::Unsolicited(value) => {
                // No subscribers is fine.
                let _ = self.notifications.send(value);
            }
        }
    }
}
