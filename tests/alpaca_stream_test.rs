//! Alpaca stream worker against a local WebSocket server

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use marketview::alpaca::AlpacaStreamClient;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

/// Accept one connection, greet and authenticate it after `greeting_delay`, then
/// forward every client frame to the returned receiver.
async fn serve_once(greeting_delay: Duration) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        sleep(greeting_delay).await;
        ws.send(Message::Text(
            json!([{"T": "success", "msg": "connected"}]).to_string(),
        ))
        .await
        .unwrap();

        let mut authenticated = false;
        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            if !authenticated {
                assert_eq!(frame["action"], "auth");
                authenticated = true;
                ws.send(Message::Text(
                    json!([{"T": "success", "msg": "authenticated"}]).to_string(),
                ))
                .await
                .unwrap();
                continue;
            }
            if frames_tx.send(frame).is_err() {
                break;
            }
        }
    });

    (url, frames_rx)
}

#[tokio::test]
async fn test_abandoned_subscription_is_not_routed() {
    let (url, mut frames) = serve_once(Duration::from_millis(200)).await;
    let client = AlpacaStreamClient::new(url, "key".to_string(), "secret".to_string());

    // The caller gives up while the connection is still being set up
    let (aapl_tx, mut aapl_rx) = mpsc::unbounded_channel();
    let abandoned = timeout(Duration::from_millis(50), client.subscribe("AAPL", aapl_tx)).await;
    assert!(abandoned.is_err());

    let (msft_tx, _msft_rx) = mpsc::unbounded_channel();
    let token = timeout(Duration::from_secs(5), client.subscribe("MSFT", msft_tx))
        .await
        .unwrap()
        .unwrap();
    assert!(token.to_string().starts_with("MSFT"));

    let first = timeout(Duration::from_secs(5), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first["action"], "subscribe");
    assert_eq!(first["bars"], json!(["MSFT"]));

    // The abandoned sink was dropped rather than kept in the route table
    let closed = timeout(Duration::from_secs(5), aapl_rx.recv()).await.unwrap();
    assert_eq!(closed, None);
}

#[tokio::test]
async fn test_last_unsubscribe_sends_frame() {
    let (url, mut frames) = serve_once(Duration::ZERO).await;
    let client = AlpacaStreamClient::new(url, "key".to_string(), "secret".to_string());

    let (tx, _rx) = mpsc::unbounded_channel();
    let first = client.subscribe("AAPL", tx.clone()).await.unwrap();
    let second = client.subscribe("AAPL", tx).await.unwrap();

    client.unsubscribe(first);
    client.unsubscribe(second);

    let subscribe = timeout(Duration::from_secs(5), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscribe["action"], "subscribe");

    // A single subscribe frame covers both sinks; the unsubscribe follows the last one
    let unsubscribe = timeout(Duration::from_secs(5), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unsubscribe["action"], "unsubscribe");
    assert_eq!(unsubscribe["bars"], json!(["AAPL"]));
}
