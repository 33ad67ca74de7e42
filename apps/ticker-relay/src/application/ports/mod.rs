//! Port Interfaces
//!
//! Defines the interfaces (ports) between the broadcast core and the
//! outside world following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Sink`: delivers one encoded payload to one downstream subscriber

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::streaming::BroadcastFrame;
use crate::domain::subscriber::SubscriberRegistry;

/// Errors delivering a payload to a single sink.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The sink was already closed.
    #[error("sink closed")]
    Closed,

    /// The underlying transport rejected the write.
    #[error("transport error: {0}")]
    Transport(String),

    /// The write did not complete within the allowed time.
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

impl DeliveryError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Transport(_) => "transport",
            Self::TimedOut(_) => "timeout",
        }
    }
}

/// A place to deliver outbound payloads for one downstream subscriber.
///
/// Implementations must be safe to call from the broadcast task while the
/// subscriber's own task is reading from the same connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one payload.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` if the payload could not be written. The
    /// caller treats any error as fatal for this sink.
    async fn deliver(&self, frame: &BroadcastFrame) -> Result<(), DeliveryError>;

    /// Release the underlying transport. Must be safe to call more than once.
    async fn close(&self);
}

/// Registry of sinks shared by the broadcast engine and subscriber endpoints.
pub type SinkRegistry = SubscriberRegistry<dyn Sink>;

/// Shared registry reference.
pub type SharedSinkRegistry = Arc<SinkRegistry>;
