//! Upstream Session
//!
//! Owns the single WebSocket connection to the Binance raw stream endpoint
//! for the lifetime of one session.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Streaming -> Closing -> Closed
//! ```
//!
//! The session subscribes to one `<symbol>@ticker` stream, answers server
//! Ping probes, forwards every 24hr ticker to the broadcast queue and drops
//! everything else. On cancellation it unsubscribes and sends a normal close
//! frame. It never reconnects; a fatal error is returned to the caller.
//!
//! # Stream URL
//!
//! - Production: `wss://stream.binance.com:9443/ws`

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, InboundFrame, TickerCodec};
use super::keepalive::{KeepaliveConfig, KeepaliveError, KeepaliveMonitor};
use super::messages::{ControlResponse, StreamRequest};
use super::status::{SessionState, SessionStatus};
use crate::domain::streaming::{BroadcastFrame, TickerSymbol};
use crate::infrastructure::broadcast::Publisher;
use crate::infrastructure::metrics::{self, ProbeOutcome};

/// Default upstream endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Deadline for the best-effort UNSUBSCRIBE and close frame.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Normal closure status code.
const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close status reported when the peer's close frame carried no code.
const NO_STATUS_CODE: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// =============================================================================
// Error Types
// =============================================================================

/// Ways the read side of the connection can fail.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Transport error while reading.
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer closed with a status other than normal closure.
    #[error("closed by peer with code {code}: {reason}")]
    AbnormalClose {
        /// Close status code.
        code: u16,
        /// Close reason text.
        reason: String,
    },

    /// Stream ended without a close frame.
    #[error("stream ended without close frame")]
    EndOfStream,
}

/// Failure to send a control request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),

    /// The encoded request could not be written.
    #[error("send failed: {0}")]
    Send(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    /// SUBSCRIBE could not be sent.
    #[error("subscribe failed: {0}")]
    Subscribe(#[source] RequestError),

    /// Reading from the connection failed.
    #[error("read failed: {0}")]
    Read(#[from] ReadError),

    /// Answering a keepalive probe failed at the transport.
    #[error("keepalive reply failed: {0}")]
    Keepalive(#[source] tokio_tungstenite::tungstenite::Error),

    /// No frames arrived within the inactivity window.
    #[error("upstream stale: no frames for {0:?}")]
    Stale(Duration),

    /// The broadcast queue was closed underneath the session.
    #[error("broadcast queue closed")]
    QueueClosed,
}

impl SessionError {
    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Subscribe(_) => "subscribe",
            Self::Read(_) => "read",
            Self::Keepalive(_) => "keepalive",
            Self::Stale(_) => "stale",
            Self::QueueClosed => "queue_closed",
        }
    }
}

impl From<KeepaliveError> for SessionError {
    fn from(error: KeepaliveError) -> Self {
        match error {
            KeepaliveError::Stale(idle) => Self::Stale(idle),
        }
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cancellation signal fired.
    Cancelled,
    /// The peer closed with a normal closure status.
    ClosedByPeer,
}

/// Why the read loop stopped without error.
enum StreamExit {
    Cancelled,
    PeerClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for an upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// WebSocket URL.
    pub url: String,
    /// Symbol to subscribe to.
    pub symbol: TickerSymbol,
    /// Keepalive configuration.
    pub keepalive: KeepaliveConfig,
}

impl UpstreamConfig {
    /// Create a configuration with default keepalive behavior.
    #[must_use]
    pub fn new(url: impl Into<String>, symbol: TickerSymbol) -> Self {
        Self {
            url: url.into(),
            symbol,
            keepalive: KeepaliveConfig::default(),
        }
    }

    /// Override the keepalive configuration.
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }
}

// =============================================================================
// Upstream Session
// =============================================================================

/// One connection to the upstream stream.
///
/// Consumed by [`UpstreamSession::run`]. Dropping the session drops its
/// publisher, which closes the broadcast queue once no other publisher is
/// left.
pub struct UpstreamSession {
    config: UpstreamConfig,
    codec: TickerCodec,
    publisher: Publisher,
    cancel: CancellationToken,
    status: Arc<SessionStatus>,
    next_request_id: u64,
}

impl UpstreamSession {
    /// Create a new session.
    #[must_use]
    pub fn new(config: UpstreamConfig, publisher: Publisher, cancel: CancellationToken) -> Self {
        Self {
            config,
            codec: TickerCodec::new(),
            publisher,
            cancel,
            status: Arc::new(SessionStatus::new()),
            next_request_id: 1,
        }
    }

    /// Report into an existing status mirror instead of a private one.
    #[must_use]
    pub fn with_status(mut self, status: Arc<SessionStatus>) -> Self {
        self.status = status;
        self
    }

    /// The status mirror this session writes to.
    #[must_use]
    pub fn status(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }

    /// Run the session until cancellation, normal closure or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns a `SessionError` when the connection cannot be opened, the
    /// subscription cannot be sent, or the connection fails while streaming.
    pub async fn run(mut self) -> Result<SessionEnd, SessionError> {
        let result = self.connect_and_stream().await;

        if let Err(error) = &result {
            tracing::error!(error = %error, kind = error.kind(), "Upstream session failed");
            self.status.set_error(error.to_string());
        }
        self.status.set_state(SessionState::Closed);
        result
    }

    async fn connect_and_stream(&mut self) -> Result<SessionEnd, SessionError> {
        self.status.set_state(SessionState::Connecting);
        tracing::info!(url = %self.config.url, symbol = %self.config.symbol, "Connecting to Binance stream");

        let ws_stream = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                tracing::info!("Upstream session cancelled while connecting");
                return Ok(SessionEnd::Cancelled);
            }
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => {
                let (ws_stream, _response) = result.map_err(SessionError::Connect)?;
                ws_stream
            }
        };

        let (mut write, mut read) = ws_stream.split();

        let stream = self.config.symbol.ticker_stream();
        let request = StreamRequest::subscribe(stream.as_str(), self.next_request_id());
        self.send_request(&mut write, &request)
            .await
            .map_err(SessionError::Subscribe)?;
        self.status.set_state(SessionState::Subscribed);
        tracing::info!(stream = %stream, id = request.id, "Subscription requested");

        match self.stream(&mut write, &mut read).await? {
            StreamExit::Cancelled => {
                self.close(&mut write).await;
                Ok(SessionEnd::Cancelled)
            }
            StreamExit::PeerClosed => {
                tracing::info!("Binance closed the stream normally");
                Ok(SessionEnd::ClosedByPeer)
            }
        }
    }

    /// Read loop: frames, keepalive probes, watchdog and cancellation.
    async fn stream(
        &mut self,
        write: &mut WsWrite,
        read: &mut WsRead,
    ) -> Result<StreamExit, SessionError> {
        let keepalive = self.config.keepalive.clone();
        let check_interval = keepalive.check_interval.max(Duration::from_millis(1));
        let mut monitor = KeepaliveMonitor::new(keepalive);
        let mut watchdog =
            tokio::time::interval_at(Instant::now() + check_interval, check_interval);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(StreamExit::Cancelled),
                _ = watchdog.tick() => {
                    monitor.check(Instant::now().into_std())?;
                }
                msg = read.next() => {
                    let now = Instant::now().into_std();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            monitor.record_activity(now);
                            self.status.record_frame();
                            if let Some(frame) = self.handle_text(text.as_str()) {
                                tokio::select! {
                                    () = self.cancel.cancelled() => return Ok(StreamExit::Cancelled),
                                    result = self.publisher.publish(frame) => {
                                        result.map_err(|_| SessionError::QueueClosed)?;
                                        self.status.record_ticker_forwarded();
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            monitor.record_probe(now);
                            self.status.record_frame();
                            self.answer_probe(write, data, &mut monitor).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return close_outcome(frame);
                        }
                        Some(Ok(_)) => {
                            monitor.record_activity(now);
                            self.status.record_frame();
                        }
                        Some(Err(e)) => return Err(ReadError::Transport(e).into()),
                        None => return Err(ReadError::EndOfStream.into()),
                    }
                }
            }
        }
    }

    /// Decode one text frame, returning the payload to broadcast if any.
    fn handle_text(&self, text: &str) -> Option<BroadcastFrame> {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode upstream frame");
                self.status.record_decode_error();
                metrics::record_decode_error();
                return None;
            }
        };
        metrics::record_upstream_frame(frame.kind());

        match frame {
            InboundFrame::ControlAck(response) => {
                self.handle_control(&response);
                None
            }
            InboundFrame::Unrecognized { event_type } => {
                tracing::debug!(event_type = %event_type, "Ignoring non-ticker event");
                None
            }
            InboundFrame::Ticker(event) => {
                let update = self.codec.project(&event);
                let time = update
                    .event_time()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default();
                tracing::debug!(
                    symbol = %update.symbol,
                    price = %update.price,
                    change = %update.change,
                    volume = %update.volume,
                    time = %time,
                    "Ticker"
                );
                self.mark_streaming();

                match update.to_frame() {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode price update");
                        None
                    }
                }
            }
        }
    }

    fn handle_control(&self, response: &ControlResponse) {
        if response.is_error() {
            match response.rejection() {
                Some(error) => tracing::warn!(
                    id = ?response.id,
                    code = error.code,
                    msg = %error.msg,
                    "Binance rejected control request"
                ),
                None => tracing::warn!(
                    id = ?response.id,
                    body = ?response.error,
                    "Binance rejected control request"
                ),
            }
            return;
        }
        tracing::info!(id = ?response.id, "Control request acknowledged");
        self.mark_streaming();
    }

    fn mark_streaming(&self) {
        if self.status.state() == SessionState::Subscribed {
            self.status.set_state(SessionState::Streaming);
        }
    }

    async fn answer_probe(
        &self,
        write: &mut WsWrite,
        data: Bytes,
        monitor: &mut KeepaliveMonitor,
    ) -> Result<(), SessionError> {
        let deadline = monitor.config().pong_deadline;
        match tokio::time::timeout(deadline, write.send(Message::Pong(data))).await {
            Ok(Ok(())) => {
                monitor.record_answered();
                self.status.record_probe_answered();
                metrics::record_keepalive_probe(ProbeOutcome::Answered);
                tracing::trace!("Answered keepalive probe");
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::Keepalive(e)),
            Err(_) => {
                monitor.record_deadline_missed();
                self.status.record_probe_missed();
                metrics::record_keepalive_probe(ProbeOutcome::Missed);
                tracing::warn!(
                    deadline_ms = deadline.as_millis(),
                    missed = monitor.deadlines_missed(),
                    answered = monitor.probes_answered(),
                    "Keepalive reply missed its deadline"
                );
                Ok(())
            }
        }
    }

    /// Unsubscribe and send a normal close frame. Failures are logged only.
    async fn close(&mut self, write: &mut WsWrite) {
        self.status.set_state(SessionState::Closing);

        let request = StreamRequest::unsubscribe(
            self.config.symbol.ticker_stream(),
            self.next_request_id(),
        );
        match tokio::time::timeout(CLOSE_WRITE_TIMEOUT, self.send_request(write, &request)).await {
            Ok(Ok(())) => tracing::info!(id = request.id, "Unsubscribe sent"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to send unsubscribe"),
            Err(_) => tracing::warn!("Timed out sending unsubscribe"),
        }

        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        match tokio::time::timeout(CLOSE_WRITE_TIMEOUT, write.send(close)).await {
            Ok(Ok(())) => tracing::info!("Upstream connection closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "Failed to send close frame"),
            Err(_) => tracing::debug!("Timed out sending close frame"),
        }
    }

    async fn send_request(
        &self,
        write: &mut WsWrite,
        request: &StreamRequest,
    ) -> Result<(), RequestError> {
        let text = self.codec.encode(request)?;
        write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    const fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

fn close_outcome(frame: Option<CloseFrame>) -> Result<StreamExit, SessionError> {
    let (code, reason) = frame.map_or((NO_STATUS_CODE, String::new()), |f| {
        (u16::from(f.code), f.reason.as_str().to_string())
    });

    if code == NORMAL_CLOSE_CODE {
        return Ok(StreamExit::PeerClosed);
    }
    Err(ReadError::AbnormalClose { code, reason }.into())
}
