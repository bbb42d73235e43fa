#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub type ServerSocket = WebSocketStream<TcpStream>;

/// An upgraded server-side connection plus the query it was opened with.
pub struct Accepted {
    pub query: Option<String>,
    pub ws: ServerSocket,
}

/// WebSocket server that hands every upgraded connection to the test.
pub async fn ws_server() -> (String, mpsc::UnboundedReceiver<Accepted>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(accepted) = upgrade(tcp).await {
                    let _ = tx.send(accepted);
                }
            });
        }
    });
    (url, rx)
}

/// Complete the WebSocket handshake on an accepted TCP stream.
pub async fn upgrade(tcp: TcpStream) -> Option<Accepted> {
    let mut query = None;
    let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        query = req.uri().query().map(str::to_string);
        Ok(resp)
    };
    let ws = tokio_tungstenite::accept_hdr_async(tcp, capture).await.ok()?;
    Some(Accepted { query, ws })
}

/// TCP listener that accepts and immediately drops every connection, so
/// every WebSocket handshake against it fails. Counts the accepts.
pub async fn refusing_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(tcp);
        }
    });
    (url, accepts)
}

/// Fail the test instead of hanging.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

pub async fn next_conn(rx: &mut mpsc::UnboundedReceiver<Accepted>) -> Accepted {
    within(rx.recv()).await.expect("server stopped")
}

/// Next text frame as JSON.
pub async fn next_json(ws: &mut ServerSocket) -> Value {
    loop {
        let msg = within(ws.next()).await.expect("client closed").expect("read failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("client sent invalid JSON");
        }
    }
}

pub async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

pub async fn send_raw(ws: &mut ServerSocket, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

pub async fn send_binary(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::Binary(value.to_string().into_bytes())).await.unwrap();
}
