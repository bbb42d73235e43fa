mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use chainfeed_core::backoff::ReconnectConfig;
use chainfeed_core::config::ClientConfig;
use chainfeed_core::error::{ErrorKind, TransportError};
use chainfeed_core::transport::{ConnectionState, RpcTransport};
use chainfeed_ws::WsRpcClient;

use common::*;

fn client_for(url: &str) -> WsRpcClient {
    let config = ClientConfig::default()
        .with_endpoint(url)
        .with_reconnect(ReconnectConfig::default().with_base_delay(Duration::from_millis(5)));
    WsRpcClient::new(config).unwrap()
}

#[tokio::test]
async fn messages_queued_while_connecting_flush_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let client = client_for(&url);
    assert_eq!(client.state(), ConnectionState::Closed);

    // Nothing answers the handshake yet, so these all wait in the queue.
    for i in 1..=4 {
        client.notify("tick", vec![json!(i)]).unwrap();
    }
    let mut status = client.watch_status();
    within(status.wait_for(|s| s.state == ConnectionState::Connecting))
        .await
        .unwrap();

    let (tcp, _) = within(listener.accept()).await.unwrap();
    let mut server = upgrade(tcp).await.unwrap();

    for i in 1..=4 {
        let frame = next_json(&mut server.ws).await;
        assert_eq!(frame["method"], "tick");
        assert_eq!(frame["params"][0], i);
    }
    within(status.wait_for(|s| s.is_open())).await.unwrap();
}

#[tokio::test]
async fn concurrent_calls_resolve_by_id() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);

    let server = tokio::spawn(async move {
        let mut conn = next_conn(&mut conns).await;
        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(next_json(&mut conn.ws).await);
        }
        // Answer in reverse order; each result echoes its method name.
        for req in requests.iter().rev() {
            send_json(
                &mut conn.ws,
                json!({"jsonrpc": "2.0", "id": req["id"], "result": req["method"]}),
            )
            .await;
        }
        conn
    });

    let (a, b, c) = within(async {
        tokio::join!(
            client.request("token-price", vec![json!({"symbol": "ETH"})]),
            client.request("block-number", vec![]),
            client.request("gas-price", vec![]),
        )
    })
    .await;

    assert_eq!(a.unwrap(), json!("token-price"));
    assert_eq!(b.unwrap(), json!("block-number"));
    assert_eq!(c.unwrap(), json!("gas-price"));
    server.await.unwrap();
}

#[tokio::test]
async fn result_and_error_frames() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);

    let server = tokio::spawn(async move {
        let mut conn = next_conn(&mut conns).await;
        let first = next_json(&mut conn.ws).await;
        send_json(
            &mut conn.ws,
            json!({"jsonrpc": "2.0", "id": first["id"], "result": {"price": "3120.55"}}),
        )
        .await;
        let second = next_json(&mut conn.ws).await;
        send_json(
            &mut conn.ws,
            json!({"jsonrpc": "2.0", "id": second["id"], "error": {"code": 1, "message": "bad"}}),
        )
        .await;
        let third = next_json(&mut conn.ws).await;
        send_json(&mut conn.ws, json!({"jsonrpc": "2.0", "id": third["id"]})).await;
        conn
    });

    #[derive(serde::Deserialize)]
    struct Price {
        price: String,
    }
    let price: Price = within(client.call("token-price", vec![json!({"chain": "eth"})]))
        .await
        .unwrap();
    assert_eq!(price.price, "3120.55");

    let err = within(client.request("token-price", vec![])).await.unwrap_err();
    match &err {
        TransportError::Rpc(rpc) => assert_eq!(rpc.message, "bad"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);

    let err = within(client.request("token-price", vec![])).await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidResponse(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_frame_does_not_end_connection() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);

    let server = tokio::spawn(async move {
        let mut conn = next_conn(&mut conns).await;
        let req = next_json(&mut conn.ws).await;
        send_raw(&mut conn.ws, "{this is not json").await;
        send_raw(&mut conn.ws, "[1, 2, 3]").await;
        send_json(&mut conn.ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": 7})).await;
        conn
    });

    let value = within(client.request("block-number", vec![])).await.unwrap();
    assert_eq!(value, json!(7));
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.status().reconnect_attempts, 0);
    server.await.unwrap();
}

#[tokio::test]
async fn connection_loss_fails_in_flight_calls() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);

    let server = tokio::spawn(async move {
        let mut conn = next_conn(&mut conns).await;
        let _ = next_json(&mut conn.ws).await;
        drop(conn);
        // The client redials; answer a follow-up call on the new socket.
        let mut conn = next_conn(&mut conns).await;
        let req = next_json(&mut conn.ws).await;
        send_json(&mut conn.ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": "again"})).await;
        conn
    });

    let err = within(client.request("token-price", vec![])).await.unwrap_err();
    assert_eq!(err, TransportError::ConnectionLost);
    assert_eq!(err.kind(), ErrorKind::NetworkError);

    let value = within(client.request("token-price", vec![])).await.unwrap();
    assert_eq!(value, json!("again"));
    server.await.unwrap();
}

#[tokio::test]
async fn request_times_out() {
    let (url, mut conns) = ws_server().await;
    let config = ClientConfig::default()
        .with_endpoint(&url)
        .with_request_timeout(Some(Duration::from_millis(100)));
    let client = WsRpcClient::new(config).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = next_conn(&mut conns).await;
        let _ = next_json(&mut conn.ws).await;
        conn
    });

    let err = within(client.request("slow", vec![])).await.unwrap_err();
    assert_eq!(err, TransportError::Timeout { ms: 100 });
    assert_eq!(err.kind(), ErrorKind::Timeout);
    let _conn = server.await.unwrap();
}

#[tokio::test]
async fn reconnect_budget_is_bounded_and_reset_by_connect() {
    let (url, accepts) = refusing_server().await;
    let client = client_for(&url);
    let mut status = client.watch_status();

    let started = Instant::now();
    client.connect().await.unwrap();
    within(status.wait_for(|s| s.exhausted)).await.unwrap();

    // One explicit dial plus five automatic retries, 5+10+15+20+25 ms apart.
    assert!(started.elapsed() >= Duration::from_millis(75));
    assert_eq!(accepts.load(Ordering::SeqCst), 6);
    assert_eq!(client.status().reconnect_attempts, 5);
    assert_eq!(client.state(), ConnectionState::Closed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 6, "no sixth automatic attempt");

    let err = within(client.request("token-price", vec![])).await.unwrap_err();
    assert_eq!(err, TransportError::ConnectionExhausted { attempts: 5 });
    assert!(client.notify("tick", vec![]).is_err());

    let err = within(client.wait_open()).await.unwrap_err();
    assert_eq!(err, TransportError::ConnectionExhausted { attempts: 5 });
    assert_eq!(accepts.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn disconnect_fails_pending_and_resets() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);

    let server = tokio::spawn(async move {
        let mut conn = next_conn(&mut conns).await;
        let _ = next_json(&mut conn.ws).await;
        conn
    });

    let pending = client.request("token-price", vec![]);
    let disconnect = async {
        let mut status = client.watch_status();
        within(status.wait_for(|s| s.is_open())).await.unwrap();
        // Give the call time to be written before tearing down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.disconnect().await;
    };
    let (outcome, ()) = within(async { tokio::join!(pending, disconnect) }).await;

    assert_eq!(outcome.unwrap_err(), TransportError::ConnectionLost);
    let status = client.status();
    assert_eq!(status.state, ConnectionState::Closed);
    assert_eq!(status.reconnect_attempts, 0);
    assert!(!status.exhausted);
    let _conn = server.await.unwrap();
}

#[tokio::test]
async fn unsolicited_frames_reach_subscribers() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);
    let mut pushes = client.notifications();

    within(client.wait_open()).await.unwrap();
    let mut conn = next_conn(&mut conns).await;
    send_json(
        &mut conn.ws,
        json!({"jsonrpc": "2.0", "method": "price-alert", "params": {"symbol": "ETH"}}),
    )
    .await;

    let push: Value = within(pushes.recv()).await.unwrap();
    assert_eq!(push["method"], "price-alert");
    assert_eq!(push["params"]["symbol"], "ETH");
}

#[tokio::test]
async fn connect_while_open_reuses_the_socket_and_answers_pings() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);
    within(client.wait_open()).await.unwrap();
    let mut conn = next_conn(&mut conns).await;

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Open);

    conn.ws.send(Message::Ping(b"hi".to_vec())).await.unwrap();
    loop {
        match within(conn.ws.next()).await.unwrap().unwrap() {
            Message::Pong(data) => {
                assert_eq!(data, b"hi".to_vec());
                break;
            }
            other => panic!("expected pong, got {other:?}"),
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conns.try_recv().is_err(), "connect() opened a second socket");
    assert_eq!(client.status().reconnect_attempts, 0);
}

#[tokio::test]
async fn binary_response_frames_settle_calls() {
    let (url, mut conns) = ws_server().await;
    let client = client_for(&url);

    let server = tokio::spawn(async move {
        let mut conn = next_conn(&mut conns).await;
        let req = next_json(&mut conn.ws).await;
        send_binary(&mut conn.ws, json!({"jsonrpc": "2.0", "id": req["id"], "result": "ok"})).await;
        conn
    });

    let value = within(client.request("block-number", vec![])).await.unwrap();
    assert_eq!(value, json!("ok"));
    server.await.unwrap();
}

#[tokio::test]
async fn rejects_non_websocket_endpoint() {
    let err = WsRpcClient::with_endpoint("https://api.example.com").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}
