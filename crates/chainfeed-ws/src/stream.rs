//! Streaming sessions.
//!
//! Every streaming call opens its own WebSocket to the stream endpoint with
//! the call encoded in the query string. A background task reads frames,
//! decodes them into the item type and hands them to the consumer through a
//! channel. The reader never waits on the consumer unless a buffer bound was
//! configured, so items are neither dropped nor reordered.
//!
//! Dropping the [`StreamHandle`] cancels the session: the task notices the
//! closed channel, sends a close frame and releases the socket.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use chainfeed_core::backoff::ReconnectPolicy;
use chainfeed_core::config::StreamOptions;
use chainfeed_core::error::TransportError;
use chainfeed_core::query::StreamRequest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Item<T> = Result<T, TransportError>;

/// Consumer side of a streaming session.
///
/// Yields decoded items in arrival order. A connection failure before the
/// stream opened is yielded as a single [`TransportError::Network`] item.
pub struct StreamHandle<T> {
    url: String,
    rx: Inlet<T>,
}

impl<T> StreamHandle<T> {
    /// The full connection URL, query included.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop the session. Equivalent to dropping the handle.
    pub fn close(self) {}
}

impl<T> Stream for StreamHandle<T> {
    type Item = Item<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().rx {
            Inlet::Bounded(rx) => rx.poll_recv(cx),
            Inlet::Unbounded(rx) => rx.poll_recv(cx),
        }
    }
}

enum Inlet<T> {
    Bounded(mpsc::Receiver<Item<T>>),
    Unbounded(mpsc::UnboundedReceiver<Item<T>>),
}

enum Outlet<T> {
    Bounded(mpsc::Sender<Item<T>>),
    Unbounded(mpsc::UnboundedSender<Item<T>>),
}

impl<T> Outlet<T> {
    /// Hand one item to the consumer. `false` once the consumer is gone.
    async fn deliver(&self, item: Item<T>) -> bool {
        match self {
            Self::Bounded(tx) => tx.send(item).await.is_ok(),
            Self::Unbounded(tx) => tx.send(item).is_ok(),
        }
    }

    /// Resolves when the consumer drops its handle.
    async fn closed(&self) {
        match self {
            Self::Bounded(tx) => tx.closed().await,
            Self::Unbounded(tx) => tx.closed().await,
        }
    }
}

/// Open a streaming session for `request` on `endpoint`.
///
/// Returns immediately; the connection is made in the background and the
/// first item is only produced once it is open.
pub fn open<T>(
    endpoint: &str,
    request: &StreamRequest,
    options: StreamOptions,
) -> Result<StreamHandle<T>, TransportError>
where
    T: DeserializeOwned + Send + 'static,
{
    let url = request.to_url(endpoint)?;
    let (outlet, inlet) = match options.buffer {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (Outlet::Bounded(tx), Inlet::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Outlet::Unbounded(tx), Inlet::Unbounded(rx))
        }
    };

    let session = StreamSession {
        url: url.clone(),
        name: request.name.clone(),
        policy: ReconnectPolicy::new(options.reconnect.clone()),
        skip_malformed: options.skip_malformed,
        outlet,
        _item: PhantomData,
    };
    tokio::spawn(session.run());

    Ok(StreamHandle {
        url: url.into(),
        rx: inlet,
    })
}

/// How one connection of a session ended.
enum End {
    /// Consumer dropped the handle.
    Cancelled,
    /// Session already reported a terminal error.
    Fatal,
    /// Server closed the socket cleanly.
    Closed,
    Failed(TransportError),
}

struct StreamSession<T> {
    url: Url,
    name: String,
    policy: ReconnectPolicy,
    skip_malformed: bool,
    outlet: Outlet<T>,
    _item: PhantomData<fn() -> T>,
}

impl<T> StreamSession<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn run(self) {
        let mut attempts = 0u32;
        let mut opened = false;

        loop {
            tracing::info!(url = %self.url, stream = %self.name, "opening stream");
            let connected = tokio::select! {
                res = tokio_tungstenite::connect_async(self.url.as_str()) => res,
                _ = self.outlet.closed() => {
                    tracing::debug!(stream = %self.name, "stream cancelled before open");
                    return;
                }
            };

            let failure = match connected {
                Ok((ws, _)) => {
                    opened = true;
                    attempts = 0;
                    tracing::info!(stream = %self.name, "stream open");
                    match self.pump(ws).await {
                        End::Cancelled | End::Fatal => return,
                        End::Closed => None,
                        End::Failed(err) => Some(err),
                    }
                }
                Err(e) if !opened => {
                    tracing::warn!(url = %self.url, error = %e, "stream connect failed");
                    self.outlet
                        .deliver(Err(TransportError::Network(format!("{}: {e}", self.url))))
                        .await;
                    return;
                }
                Err(e) => Some(TransportError::Network(e.to_string())),
            };

            match self.policy.next_delay(attempts + 1) {
                Some(delay) => {
                    attempts += 1;
                    tracing::warn!(
                        stream = %self.name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "stream dropped, reconnecting"
                    );
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = self.outlet.closed() => return,
                    }
                }
                None => {
                    if attempts > 0 {
                        tracing::error!(stream = %self.name, attempts, "stream reconnect attempts exhausted");
                        self.outlet
                            .deliver(Err(TransportError::ConnectionExhausted { attempts }))
                            .await;
                    } else if let Some(err) = failure {
                        self.outlet.deliver(Err(err)).await;
                    }
                    return;
                }
            }
        }
    }

    /// Read one connection until it ends. The socket is closed on every path.
    async fn pump(&self, ws: WsStream) -> End {
        let (mut sink, mut source) = ws.split();

        let end = loop {
            tokio::select! {
                _ = self.outlet.closed() => break End::Cancelled,
                msg = source.next() => match msg {
                    None => break End::Closed,
                    Some(Err(e)) => {
                        tracing::warn!(stream = %self.name, error = %e, "stream receive error");
                        break End::Failed(TransportError::Network(e.to_string()));
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = self.accept(serde_json::from_str::<T>(&text)).await {
                            break end;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Some(end) = self.accept(serde_json::from_slice::<T>(&bytes)).await {
                            break end;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => break End::Closed,
                    Some(Ok(_)) => {}
                }
            }
        };

        let _ = sink.close().await;
        tracing::info!(stream = %self.name, "stream closed");
        end
    }

    /// Deliver a decoded frame; `Some` ends the connection.
    async fn accept(&self, decoded: serde_json::Result<T>) -> Option<End> {
        match decoded {
            Ok(item) => {
                if self.outlet.deliver(Ok(item)).await {
                    None
                } else {
                    Some(End::Cancelled)
                }
            }
            Err(e) if self.skip_malformed => {
                tracing::warn!(stream = %self.name, error = %e, "skipping malformed stream frame");
                None
            }
            Err(e) => {
                self.outlet
                    .deliver(Err(TransportError::InvalidResponse(e.to_string())))
                    .await;
                Some(End::Fatal)
            }
        }
    }
}
