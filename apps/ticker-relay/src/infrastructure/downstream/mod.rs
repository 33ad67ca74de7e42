//! Subscriber Endpoint
//!
//! Downstream side of the relay. Each accepted WebSocket is split: the write
//! half becomes a [`WebSocketSink`] registered with the broadcast registry,
//! and the read half is consumed only to notice when the subscriber leaves.
//! Anything the subscriber sends is ignored.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink as TransportSink, SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;

use crate::application::ports::{DeliveryError, SharedSinkRegistry, Sink, SinkRegistry};
use crate::domain::streaming::BroadcastFrame;
use crate::domain::subscriber::SinkId;
use crate::infrastructure::metrics;

// =============================================================================
// WebSocket Sink
// =============================================================================

/// [`Sink`] over the write half of a downstream WebSocket.
///
/// Each payload becomes one text message. Writes are serialized by an async
/// mutex; closing is idempotent and makes later deliveries fail with
/// `DeliveryError::Closed`.
pub struct WebSocketSink<W> {
    write: Mutex<W>,
    closed: AtomicBool,
}

impl<W> WebSocketSink<W> {
    /// Wrap a message sink.
    #[must_use]
    pub fn new(write: W) -> Self {
        Self {
            write: Mutex::new(write),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<W> Sink for WebSocketSink<W>
where
    W: TransportSink<Message> + Send + Unpin,
    W::Error: Display,
{
    async fn deliver(&self, frame: &BroadcastFrame) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.write
            .lock()
            .await
            .send(Message::Text(frame.as_str().into()))
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.write.lock().await.close().await {
            tracing::debug!(error = %e, "Error closing subscriber connection");
        }
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

/// Serve one accepted WebSocket until the subscriber disconnects.
pub async fn handle_socket(socket: WebSocket, registry: SharedSinkRegistry) {
    let (write, read) = socket.split();
    let sink = Arc::new(WebSocketSink::new(write));
    serve_subscriber(&registry, sink, read).await;
}

/// Register `sink`, wait for `inbound` to end, then unregister and close.
///
/// The subscriber is considered gone on a close message, a read error or
/// the end of the stream. Returns the id the sink was registered under.
pub async fn serve_subscriber<R, E>(
    registry: &SinkRegistry,
    sink: Arc<dyn Sink>,
    mut inbound: R,
) -> SinkId
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let id = registry.register(Arc::clone(&sink));
    metrics::set_subscribers(registry.len());
    tracing::info!(subscriber = %id, active = registry.len(), "Subscriber connected");

    while let Some(msg) = inbound.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(subscriber = %id, error = %e, "Subscriber read error");
                break;
            }
        }
    }

    registry.unregister(id);
    metrics::set_subscribers(registry.len());
    sink.close().await;
    tracing::info!(subscriber = %id, active = registry.len(), "Subscriber disconnected");
    id
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc;

    use super::*;

    type Inbound = mpsc::UnboundedSender<Result<Message, axum::Error>>;

    fn inbound() -> (Inbound, mpsc::UnboundedReceiver<Result<Message, axum::Error>>) {
        mpsc::unbounded()
    }

    #[tokio::test]
    async fn sink_writes_text_messages() {
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let sink = WebSocketSink::new(tx);

        sink.deliver(&BroadcastFrame::from(r#"{"symbol":"BTCUSDT"}"#))
            .await
            .unwrap();

        let Some(Message::Text(text)) = rx.next().await else {
            panic!("expected text message");
        };
        assert_eq!(text.as_str(), r#"{"symbol":"BTCUSDT"}"#);
    }

    #[tokio::test]
    async fn closed_sink_rejects_delivery() {
        let (tx, _rx) = mpsc::unbounded::<Message>();
        let sink = WebSocketSink::new(tx);

        sink.close().await;
        sink.close().await;

        assert!(sink.is_closed());
        assert!(matches!(
            sink.deliver(&BroadcastFrame::from("x")).await,
            Err(DeliveryError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropped_peer_is_transport_error() {
        let (tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        let sink = WebSocketSink::new(tx);

        assert!(matches!(
            sink.deliver(&BroadcastFrame::from("x")).await,
            Err(DeliveryError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn subscriber_is_registered_until_close_message() {
        let registry = Arc::new(SinkRegistry::new());
        let (out_tx, _out_rx) = mpsc::unbounded::<Message>();
        let sink: Arc<dyn Sink> = Arc::new(WebSocketSink::new(out_tx));
        let (in_tx, in_rx) = inbound();

        let task = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { serve_subscriber(&registry, sink, in_rx).await })
        };

        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        in_tx
            .unbounded_send(Ok(Message::Text("ignored".into())))
            .unwrap();
        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let id = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn read_error_unregisters_and_closes() {
        let registry = Arc::new(SinkRegistry::new());
        let (out_tx, _out_rx) = mpsc::unbounded::<Message>();
        let ws_sink = Arc::new(WebSocketSink::new(out_tx));
        let (in_tx, in_rx) = inbound();

        in_tx
            .unbounded_send(Err(axum::Error::new(std::io::Error::other("reset"))))
            .unwrap();

        let id = serve_subscriber(&registry, ws_sink.clone(), in_rx).await;

        assert!(!registry.contains(id));
        assert!(ws_sink.is_closed());
    }

    #[tokio::test]
    async fn end_of_stream_unregisters() {
        let registry = Arc::new(SinkRegistry::new());
        let (out_tx, _out_rx) = mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = inbound();
        drop(in_tx);

        serve_subscriber(&registry, Arc::new(WebSocketSink::new(out_tx)), in_rx).await;

        assert_eq!(registry.stats().total_unregistered, 1);
    }
}
