//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames received by kind, decode errors, keepalive probes
//! - **Session**: current state and restarts
//! - **Broadcast**: payloads published, frames dispatched, deliveries, failures
//! - **Subscribers**: active downstream connections
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the HTTP server. Recording before
//! [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::binance::SessionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed, for example when
/// another global recorder is already present.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream
    describe_counter!(
        "ticker_relay_upstream_frames_total",
        "Total frames received from the upstream stream by kind"
    );
    describe_counter!(
        "ticker_relay_decode_errors_total",
        "Total upstream frames that failed to decode"
    );
    describe_counter!(
        "ticker_relay_keepalive_probes_total",
        "Total upstream keepalive probes by outcome"
    );

    // Session
    describe_gauge!(
        "ticker_relay_session_state",
        "Upstream session state (0=disconnected .. 5=closed)"
    );
    describe_counter!(
        "ticker_relay_session_restarts_total",
        "Total upstream session restarts"
    );

    // Broadcast
    describe_counter!(
        "ticker_relay_payloads_published_total",
        "Total payloads queued for broadcast"
    );
    describe_counter!(
        "ticker_relay_frames_dispatched_total",
        "Total frames taken from the queue and broadcast"
    );
    describe_counter!(
        "ticker_relay_deliveries_total",
        "Total successful per-subscriber deliveries"
    );
    describe_counter!(
        "ticker_relay_delivery_failures_total",
        "Total failed per-subscriber deliveries by reason"
    );
    describe_histogram!(
        "ticker_relay_broadcast_duration_seconds",
        "Time to deliver one frame to every subscriber"
    );

    // Subscribers
    describe_gauge!(
        "ticker_relay_subscribers",
        "Number of registered downstream subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for keepalive probe outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Pong written within the deadline.
    Answered,
    /// Pong write exceeded the deadline.
    Missed,
}

impl ProbeOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::Missed => "missed",
        }
    }
}

/// Record an upstream frame by kind.
pub fn record_upstream_frame(kind: &'static str) {
    counter!("ticker_relay_upstream_frames_total", "kind" => kind).increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("ticker_relay_decode_errors_total").increment(1);
}

/// Record a keepalive probe outcome.
pub fn record_keepalive_probe(outcome: ProbeOutcome) {
    counter!(
        "ticker_relay_keepalive_probes_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the session state gauge.
pub fn set_session_state(state: SessionState) {
    gauge!("ticker_relay_session_state").set(f64::from(state.as_u8()));
}

/// Record a session restart.
pub fn record_session_restart() {
    counter!("ticker_relay_session_restarts_total").increment(1);
}

/// Record a payload queued for broadcast.
pub fn record_payload_published() {
    counter!("ticker_relay_payloads_published_total").increment(1);
}

/// Record one broadcast round.
pub fn record_broadcast(delivered: u64, duration: Duration) {
    counter!("ticker_relay_frames_dispatched_total").increment(1);
    counter!("ticker_relay_deliveries_total").increment(delivered);
    histogram!("ticker_relay_broadcast_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed delivery.
pub fn record_delivery_failure(reason: &'static str) {
    counter!(
        "ticker_relay_delivery_failures_total",
        "reason" => reason
    )
    .increment(1);
}

/// Update the subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("ticker_relay_subscribers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
