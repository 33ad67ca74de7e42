//! Binance WebSocket Adapter
//!
//! Client side of the Binance spot raw stream endpoint:
//!
//! - `messages`: wire format types
//! - `codec`: frame classification and request encoding
//! - `keepalive`: probe answering and inactivity watchdog
//! - `session`: the upstream connection lifecycle
//! - `status`: read-only session mirror for health reporting
//! - `restart`: backoff between sessions, applied by the entry point

pub mod codec;
pub mod keepalive;
pub mod messages;
pub mod restart;
pub mod session;
pub mod status;

pub use codec::{CodecError, InboundFrame, TickerCodec};
pub use keepalive::{KeepaliveConfig, KeepaliveError, KeepaliveMonitor};
pub use messages::{ControlResponse, StreamRequest, TickerEvent};
pub use restart::{RestartConfig, RestartError, RestartPolicy};
pub use session::{
    DEFAULT_STREAM_URL, ReadError, RequestError, SessionEnd, SessionError, UpstreamConfig,
    UpstreamSession,
};
pub use status::{SessionSnapshot, SessionState, SessionStatus};
