//! Subscriber Endpoint Integration Tests
//!
//! Serves the real router on an ephemeral port and connects WebSocket
//! clients to `/ws`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use ticker_relay::infrastructure::http::{router, serve};
use ticker_relay::{
    AppState, BroadcastConfig, BroadcastFrame, Publisher, SessionStatus, SharedSinkRegistry,
    SinkRegistry, broadcast_channel,
};

const WAIT: Duration = Duration::from_secs(5);

struct Relay {
    url: String,
    registry: SharedSinkRegistry,
    publisher: Publisher,
    cancel: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

async fn start_relay() -> Relay {
    let registry: SharedSinkRegistry = Arc::new(SinkRegistry::new());
    let (publisher, engine) = broadcast_channel(BroadcastConfig::default(), Arc::clone(&registry));
    let state = Arc::new(AppState::new(
        "test".to_string(),
        Arc::clone(&registry),
        Arc::new(SessionStatus::new()),
        engine.stats(),
    ));
    tokio::spawn(engine.run());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            serve(listener, router(state, None), cancel).await.unwrap();
        })
    };

    Relay {
        url: format!("ws://{addr}/ws"),
        registry,
        publisher,
        cancel,
        server,
    }
}

async fn wait_for_subscribers(registry: &SinkRegistry, count: usize) {
    timeout(WAIT, async {
        while registry.len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn connected_clients_receive_every_frame() {
    let relay = start_relay().await;

    let (mut first, _) = tokio_tungstenite::connect_async(relay.url.as_str()).await.unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(relay.url.as_str()).await.unwrap();
    wait_for_subscribers(&relay.registry, 2).await;

    let payload = r#"{"symbol":"BTCUSDT","price":"65000.10","change":"1.23","volume":"1000.5","timestamp":1700000000000}"#;
    relay.publisher.publish(BroadcastFrame::from(payload)).await.unwrap();
    relay.publisher.publish(BroadcastFrame::from("second")).await.unwrap();

    for client in [&mut first, &mut second] {
        let Some(Ok(Message::Text(text))) = timeout(WAIT, client.next()).await.unwrap() else {
            panic!("expected text frame");
        };
        assert_eq!(text.as_str(), payload);

        let Some(Ok(Message::Text(text))) = timeout(WAIT, client.next()).await.unwrap() else {
            panic!("expected text frame");
        };
        assert_eq!(text.as_str(), "second");
    }

    relay.cancel.cancel();
    drop(first);
    drop(second);
}

#[tokio::test]
async fn disconnect_unregisters_subscriber() {
    let relay = start_relay().await;

    let (mut client, _) = tokio_tungstenite::connect_async(relay.url.as_str()).await.unwrap();
    wait_for_subscribers(&relay.registry, 1).await;

    // Inbound text is ignored; the subscriber stays registered.
    client.send(Message::Text("hello".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.registry.len(), 1);

    client.close(None).await.unwrap();
    wait_for_subscribers(&relay.registry, 0).await;

    let stats = relay.registry.stats();
    assert_eq!(stats.total_registered, 1);
    assert_eq!(stats.total_unregistered, 1);

    relay.cancel.cancel();
    timeout(WAIT, relay.server).await.unwrap().unwrap();
}

#[tokio::test]
async fn vanished_client_is_removed() {
    let relay = start_relay().await;

    let (client, _) = tokio_tungstenite::connect_async(relay.url.as_str()).await.unwrap();
    wait_for_subscribers(&relay.registry, 1).await;

    drop(client);
    wait_for_subscribers(&relay.registry, 0).await;

    relay.cancel.cancel();
}
