//! Session Status
//!
//! Read-only mirror of the upstream session, written by the session task
//! and read by the health endpoints.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Upstream session lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,
    /// Opening the WebSocket.
    Connecting,
    /// SUBSCRIBE sent, waiting for the first acknowledgement or event.
    Subscribed,
    /// Receiving and forwarding events.
    Streaming,
    /// UNSUBSCRIBE and close frame being sent.
    Closing,
    /// Connection released.
    Closed,
}

impl SessionState {
    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Subscribed => 2,
            Self::Streaming => 3,
            Self::Closing => 4,
            Self::Closed => 5,
        }
    }

    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared status of the upstream session.
#[derive(Debug, Default)]
pub struct SessionStatus {
    state: RwLock<SessionState>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    last_keepalive: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    frames_received: AtomicU64,
    tickers_forwarded: AtomicU64,
    decode_errors: AtomicU64,
    probes_answered: AtomicU64,
    probes_missed: AtomicU64,
}

impl SessionStatus {
    /// Create a status in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifecycle state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        match state {
            SessionState::Connecting => *self.last_error.write() = None,
            SessionState::Subscribed => *self.connected_at.write() = Some(Utc::now()),
            _ => {}
        }
        crate::infrastructure::metrics::set_session_state(state);
    }

    /// Record the error that ended the last session.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the session is forwarding events.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Count a frame of any kind.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a ticker handed to the broadcast queue.
    pub fn record_ticker_forwarded(&self) {
        self.tickers_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame that failed to decode.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an answered probe.
    pub fn record_probe_answered(&self) {
        self.probes_answered.fetch_add(1, Ordering::Relaxed);
        *self.last_keepalive.write() = Some(Utc::now());
    }

    /// Count a probe whose Pong missed its deadline.
    pub fn record_probe_missed(&self) {
        self.probes_missed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            connected_at: *self.connected_at.read(),
            last_keepalive: *self.last_keepalive.read(),
            last_error: self.last_error.read().clone(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            tickers_forwarded: self.tickers_forwarded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            probes_answered: self.probes_answered.load(Ordering::Relaxed),
            probes_missed: self.probes_missed.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`SessionStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// When the last connection was established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// When the last probe was answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_keepalive: Option<DateTime<Utc>>,
    /// Error that ended the last session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Frames of any kind received.
    pub frames_received: u64,
    /// Tickers handed to the broadcast queue.
    pub tickers_forwarded: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Probes answered in time.
    pub probes_answered: u64,
    /// Probes answered late.
    pub probes_missed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let status = SessionStatus::new();
        assert_eq!(status.state(), SessionState::Disconnected);
        assert!(!status.is_streaming());
        assert!(status.snapshot().connected_at.is_none());
    }

    #[test]
    fn subscribed_records_connection_time() {
        let status = SessionStatus::new();
        status.set_state(SessionState::Connecting);
        status.set_state(SessionState::Subscribed);
        assert!(status.snapshot().connected_at.is_some());
    }

    #[test]
    fn reconnect_clears_last_error() {
        let status = SessionStatus::new();
        status.set_error("connection reset".to_string());
        assert_eq!(
            status.snapshot().last_error.as_deref(),
            Some("connection reset")
        );

        status.set_state(SessionState::Connecting);
        assert!(status.snapshot().last_error.is_none());
    }

    #[test]
    fn counters_accumulate() {
        let status = SessionStatus::new();
        status.record_frame();
        status.record_frame();
        status.record_ticker_forwarded();
        status.record_decode_error();
        status.record_probe_answered();

        let snapshot = status.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.tickers_forwarded, 1);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.probes_answered, 1);
        assert!(snapshot.last_keepalive.is_some());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::Streaming).unwrap();
        assert_eq!(json, "\"streaming\"");
        assert_eq!(SessionState::Closed.as_u8(), 5);
    }
}
