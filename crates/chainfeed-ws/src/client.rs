//! WebSocket JSON-RPC client with auto-reconnect and streaming sessions.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time;

use chainfeed_core::backoff::ReconnectPolicy;
use chainfeed_core::config::ClientConfig;
use chainfeed_core::envelope;
use chainfeed_core::error::TransportError;
use chainfeed_core::query::{parse_ws_url, StreamRequest};
use chainfeed_core::transport::{ConnectionState, ConnectionStatus, RpcTransport};

use crate::connection::{Command, ConnectionManager};
use crate::correlator::RequestIds;
use crate::stream::{self, StreamHandle};

/// WebSocket JSON-RPC client.
///
/// Owns a background task that holds the shared connection. The first call
/// (or an explicit [`connect`](Self::connect)) dials; calls made while the
/// socket is down are queued and sent in order once it opens. Streaming calls
/// get their own connection via [`stream`](Self::stream).
///
/// Must be created inside a Tokio runtime.
pub struct WsRpcClient {
    config: ClientConfig,
    cmd_tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    notifications: broadcast::Sender<Value>,
    ids: RequestIds,
}

impl WsRpcClient {
    /// Validate the endpoints and start the connection task. Does not dial.
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        parse_ws_url(&config.endpoint)?;
        parse_ws_url(&config.stream_endpoint)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));

        let manager = ConnectionManager::new(
            config.endpoint.clone(),
            ReconnectPolicy::new(config.reconnect.clone()),
            cmd_rx,
            status_tx,
            notifications.clone(),
        );
        tokio::spawn(manager.run());

        Ok(Self {
            config,
            cmd_tx,
            status,
            notifications,
            ids: RequestIds::new(),
        })
    }

    /// Client for `endpoint` with every other setting at its default.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(ClientConfig::default().with_endpoint(endpoint))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Ask the connection to dial. No-op while connecting or open; after the
    /// reconnect budget is spent this resets the counter and tries again.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let (ack, acked) = oneshot::channel();
        self.command(Command::Connect { ack: Some(ack) })?;
        acked.await.map_err(|_| task_stopped())
    }

    /// Connect and wait until the socket is open or the budget is spent.
    pub async fn wait_open(&self) -> Result<(), TransportError> {
        self.connect().await?;
        let mut status = self.status.clone();
        let settled = *status
            .wait_for(|s| s.is_open() || s.exhausted)
            .await
            .map_err(|_| task_stopped())?;
        if settled.exhausted {
            Err(TransportError::ConnectionExhausted {
                attempts: settled.reconnect_attempts,
            })
        } else {
            Ok(())
        }
    }

    /// Close the socket, discard queued messages, fail pending calls with
    /// [`TransportError::ConnectionLost`] and reset the reconnect counter.
    pub async fn disconnect(&self) {
        let (done, finished) = oneshot::channel();
        if self.command(Command::Disconnect { done }).is_ok() {
            let _ = finished.await;
        }
    }

    /// Current connection snapshot.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status transition.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Subscribe to frames the server pushed without being asked.
    pub fn notifications(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    /// Send an envelope without waiting for a response.
    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), TransportError> {
        let status = self.status();
        if status.exhausted {
            return Err(TransportError::ConnectionExhausted {
                attempts: status.reconnect_attempts,
            });
        }
        let text = envelope::encode(self.ids.next(), method, params)?;
        self.command(Command::Notify { text })
    }

    /// Open a dedicated streaming connection on the configured stream endpoint.
    pub fn stream<T>(&self, request: &StreamRequest) -> Result<StreamHandle<T>, TransportError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        stream::open(&self.config.stream_endpoint, request, self.config.stream.clone())
    }

    fn command(&self, cmd: Command) -> Result<(), TransportError> {
        self.cmd_tx.send(cmd).map_err(|_| task_stopped())
    }
}

fn task_stopped() -> TransportError {
    TransportError::Network("connection task stopped".into())
}

#[async_trait]
impl RpcTransport for WsRpcClient {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.ids.next();
        let text = envelope::encode(id, method, params)?;
        let (responder, response) = oneshot::channel();
        self.command(Command::Call {
            id,
            method: method.to_string(),
            text,
            responder,
        })?;

        let outcome = match self.config.request_timeout() {
            Some(limit) => match time::timeout(limit, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = self.command(Command::Cancel { id });
                    tracing::debug!(id, method, "request timed out");
                    return Err(TransportError::Timeout {
                        ms: limit.as_millis() as u64,
                    });
                }
            },
            None => response.await,
        };
        outcome.map_err(|_| TransportError::ConnectionLost)?
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn url(&self) -> &str {
        &self.config.endpoint
    }
}
