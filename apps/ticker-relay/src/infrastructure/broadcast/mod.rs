//! Broadcast Engine
//!
//! Fans each encoded payload out to every registered sink.
//!
//! # Architecture
//!
//! Producers hold a [`Publisher`] and push frames into a bounded queue. A
//! single [`BroadcastEngine`] task takes one frame at a time, snapshots the
//! registry, and writes the frame to every sink concurrently. Frame N+1 is
//! not taken until every delivery of frame N has finished or timed out, so
//! each sink sees frames in queue order.
//!
//! A sink whose delivery fails is unregistered at once and closed on a
//! detached task. Other sinks in the same round are unaffected.
//!
//! The engine stops once every publisher is dropped and the queue is empty.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::application::ports::{DeliveryError, SharedSinkRegistry, Sink};
use crate::domain::streaming::BroadcastFrame;
use crate::domain::subscriber::SinkId;
use crate::infrastructure::metrics;

/// Upper bound on closing a failed sink.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the broadcast queue and deliveries.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Frames the queue holds before publishers wait. Never below 1.
    pub queue_capacity: usize,
    /// Deadline for one delivery to one sink.
    pub sink_write_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            sink_write_timeout: Duration::from_secs(2),
        }
    }
}

impl From<crate::BroadcastSettings> for BroadcastConfig {
    fn from(settings: crate::BroadcastSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            sink_write_timeout: settings.sink_write_timeout,
        }
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Error publishing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The engine has stopped and the queue no longer accepts frames.
    #[error("broadcast queue closed")]
    Closed,
}

/// Producer handle for the broadcast queue.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<BroadcastFrame>,
}

impl Publisher {
    /// Queue a frame, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Closed` if the engine is gone.
    pub async fn publish(&self, frame: BroadcastFrame) -> Result<(), PublishError> {
        self.tx.send(frame).await.map_err(|_| PublishError::Closed)?;
        metrics::record_payload_published();
        Ok(())
    }

    /// Whether the engine is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Engine counters.
#[derive(Debug, Default)]
pub struct BroadcastStats {
    frames_dispatched: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

impl BroadcastStats {
    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`BroadcastStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStatsSnapshot {
    /// Frames taken from the queue.
    pub frames_dispatched: u64,
    /// Successful per-sink deliveries.
    pub deliveries: u64,
    /// Failed per-sink deliveries.
    pub delivery_failures: u64,
}

/// Outcome of broadcasting one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sinks that accepted the frame.
    pub delivered: usize,
    /// Sinks removed because delivery failed.
    pub removed: Vec<SinkId>,
}

// =============================================================================
// Engine
// =============================================================================

/// Create a publisher and the engine that drains it.
#[must_use]
pub fn broadcast_channel(
    config: BroadcastConfig,
    registry: SharedSinkRegistry,
) -> (Publisher, BroadcastEngine) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let engine = BroadcastEngine {
        rx,
        registry,
        write_timeout: config.sink_write_timeout,
        stats: Arc::new(BroadcastStats::default()),
    };
    (Publisher { tx }, engine)
}

/// Consumer side of the broadcast queue.
pub struct BroadcastEngine {
    rx: mpsc::Receiver<BroadcastFrame>,
    registry: SharedSinkRegistry,
    write_timeout: Duration,
    stats: Arc<BroadcastStats>,
}

impl BroadcastEngine {
    /// Shared counters, readable while the engine runs.
    #[must_use]
    pub fn stats(&self) -> Arc<BroadcastStats> {
        Arc::clone(&self.stats)
    }

    /// Broadcast frames until the queue is closed and drained.
    pub async fn run(mut self) {
        tracing::info!(
            write_timeout_ms = self.write_timeout.as_millis(),
            "Broadcast engine started"
        );

        while let Some(frame) = self.rx.recv().await {
            self.dispatch(&frame).await;
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            frames_dispatched = stats.frames_dispatched,
            deliveries = stats.deliveries,
            delivery_failures = stats.delivery_failures,
            "Broadcast queue closed, engine stopped"
        );
    }

    /// Deliver one frame to every sink registered right now.
    pub async fn dispatch(&self, frame: &BroadcastFrame) -> DispatchReport {
        let sinks = self.registry.snapshot();
        let started = Instant::now();

        let outcomes = join_all(
            sinks
                .iter()
                .map(|(id, sink)| self.deliver_one(*id, sink.as_ref(), frame)),
        )
        .await;

        let mut report = DispatchReport::default();
        for ((id, sink), outcome) in sinks.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    tracing::warn!(sink = %id, error = %error, "Delivery failed, removing subscriber");
                    metrics::record_delivery_failure(error.reason());
                    self.registry.unregister(id);
                    close_detached(id, sink);
                    report.removed.push(id);
                }
            }
        }

        self.stats.frames_dispatched.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .delivery_failures
            .fetch_add(report.removed.len() as u64, Ordering::Relaxed);
        metrics::record_broadcast(report.delivered as u64, started.elapsed());
        if !report.removed.is_empty() {
            metrics::set_subscribers(self.registry.len());
        }

        report
    }

    async fn deliver_one(
        &self,
        id: SinkId,
        sink: &dyn Sink,
        frame: &BroadcastFrame,
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.write_timeout, sink.deliver(frame)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(sink = %id, "Delivery timed out");
                Err(DeliveryError::TimedOut(self.write_timeout))
            }
        }
    }
}

fn close_detached(id: SinkId, sink: Arc<dyn Sink>) {
    tokio::spawn(async move {
        if tokio::time::timeout(SINK_CLOSE_TIMEOUT, sink.close())
            .await
            .is_err()
        {
            tracing::debug!(sink = %id, "Closing failed subscriber timed out");
        }
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::*;
    use crate::application::ports::{MockSink, SinkRegistry};

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<String>>,
        fail: bool,
        stall: bool,
        closed: AtomicBool,
        closed_notify: Notify,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn stalling() -> Self {
            Self {
                stall: true,
                ..Self::default()
            }
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().clone()
        }

        async fn wait_closed(&self) {
            let notified = self.closed_notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::timeout(Duration::from_secs(1), notified)
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn deliver(&self, frame: &BroadcastFrame) -> Result<(), DeliveryError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.fail {
                return Err(DeliveryError::Transport("broken pipe".to_string()));
            }
            self.frames.lock().push(frame.as_str().to_string());
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.closed_notify.notify_waiters();
        }
    }

    fn config() -> BroadcastConfig {
        BroadcastConfig {
            queue_capacity: 1,
            sink_write_timeout: Duration::from_millis(100),
        }
    }

    fn registry() -> SharedSinkRegistry {
        Arc::new(SinkRegistry::new())
    }

    #[test]
    fn default_config_values() {
        let config = BroadcastConfig::default();
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.sink_write_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn every_sink_receives_the_frame() {
        let registry = registry();
        let sinks: Vec<_> = (0..3).map(|_| Arc::new(RecordingSink::default())).collect();
        for sink in &sinks {
            registry.register(sink.clone());
        }
        let (_publisher, engine) = broadcast_channel(config(), registry);

        let report = engine.dispatch(&BroadcastFrame::from("hello")).await;

        assert_eq!(report.delivered, 3);
        assert!(report.removed.is_empty());
        for sink in &sinks {
            assert_eq!(sink.frames(), vec!["hello".to_string()]);
        }
    }

    #[tokio::test]
    async fn mock_sink_sees_exact_frame() {
        let registry = registry();
        let mut mock = MockSink::new();
        mock.expect_deliver()
            .withf(|frame| frame.as_str() == r#"{"symbol":"BTCUSDT"}"#)
            .times(1)
            .returning(|_| Ok(()));
        registry.register(Arc::new(mock));
        let (_publisher, engine) = broadcast_channel(config(), registry.clone());

        let report = engine
            .dispatch(&BroadcastFrame::from(r#"{"symbol":"BTCUSDT"}"#))
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn failed_sink_is_removed_and_others_still_receive() {
        let registry = registry();
        let before = Arc::new(RecordingSink::default());
        let broken = Arc::new(RecordingSink::failing());
        let after = Arc::new(RecordingSink::default());
        registry.register(before.clone());
        let broken_id = registry.register(broken.clone());
        registry.register(after.clone());
        let (_publisher, engine) = broadcast_channel(config(), registry.clone());

        let report = engine.dispatch(&BroadcastFrame::from("tick")).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, vec![broken_id]);
        assert!(!registry.contains(broken_id));
        assert_eq!(before.frames(), vec!["tick".to_string()]);
        assert_eq!(after.frames(), vec!["tick".to_string()]);
        broken.wait_closed().await;
    }

    #[tokio::test]
    async fn stalled_sink_times_out_without_blocking_others() {
        let registry = registry();
        let healthy = Arc::new(RecordingSink::default());
        let stalled = Arc::new(RecordingSink::stalling());
        registry.register(healthy.clone());
        let stalled_id = registry.register(stalled.clone());
        let (_publisher, engine) = broadcast_channel(config(), registry.clone());

        let started = Instant::now();
        let report = engine.dispatch(&BroadcastFrame::from("tick")).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.removed, vec![stalled_id]);
        assert_eq!(healthy.frames(), vec!["tick".to_string()]);
        assert_eq!(engine.stats().snapshot().delivery_failures, 1);
    }

    #[tokio::test]
    async fn removed_sink_gets_no_later_frames() {
        let registry = registry();
        let mut mock = MockSink::new();
        mock.expect_deliver()
            .times(1)
            .returning(|_| Err(DeliveryError::Closed));
        mock.expect_close().returning(|| ());
        registry.register(Arc::new(mock));
        let (_publisher, engine) = broadcast_channel(config(), registry.clone());

        engine.dispatch(&BroadcastFrame::from("one")).await;
        let report = engine.dispatch(&BroadcastFrame::from("two")).await;

        assert_eq!(report, DispatchReport::default());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dispatch_with_no_sinks_is_counted() {
        let (_publisher, engine) = broadcast_channel(config(), registry());

        let report = engine.dispatch(&BroadcastFrame::from("tick")).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(engine.stats().snapshot().frames_dispatched, 1);
    }

    #[tokio::test]
    async fn run_preserves_order_and_drains_on_close() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        registry.register(sink.clone());
        let (publisher, engine) = broadcast_channel(config(), registry);
        let stats = engine.stats();
        let handle = tokio::spawn(engine.run());

        for i in 0..20 {
            publisher.publish(BroadcastFrame::from(format!("{i}"))).await.unwrap();
        }
        drop(publisher);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(sink.frames(), expected);
        assert_eq!(stats.snapshot().frames_dispatched, 20);
    }

    #[tokio::test]
    async fn publish_fails_after_engine_dropped() {
        let (publisher, engine) = broadcast_channel(config(), registry());
        drop(engine);

        assert!(publisher.is_closed());
        assert_eq!(
            publisher.publish(BroadcastFrame::from("late")).await,
            Err(PublishError::Closed)
        );
    }

    #[test]
    fn zero_capacity_is_raised() {
        let config = BroadcastConfig {
            queue_capacity: 0,
            ..BroadcastConfig::default()
        };
        let (publisher, _engine) = broadcast_channel(config, registry());
        assert!(!publisher.is_closed());
    }
}
