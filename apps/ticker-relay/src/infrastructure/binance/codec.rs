//! Stream Codec
//!
//! Decodes raw Binance text frames and encodes control requests.
//!
//! Every frame is first parsed as a generic JSON value so it can be
//! classified before committing to a concrete shape:
//!
//! - an object with a `result` or `error` key is a control acknowledgement
//! - any other object is read as a [`TickerEvent`] and filtered by its tag
//! - anything that is not an object is rejected

use crate::domain::streaming::PriceUpdate;
use crate::infrastructure::binance::messages::{ControlResponse, StreamRequest, TickerEvent};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was valid JSON but not an object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// A classified upstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Response to a SUBSCRIBE or UNSUBSCRIBE request.
    ControlAck(ControlResponse),
    /// A 24hr ticker event.
    Ticker(TickerEvent),
    /// Any other event type.
    Unrecognized {
        /// The `e` tag, empty when absent.
        event_type: String,
    },
}

impl InboundFrame {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ControlAck(_) => "control",
            Self::Ticker(_) => "ticker",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// JSON codec for the Binance raw stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickerCodec;

impl TickerCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode and classify a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object, or if a non-control
    /// object has ticker fields of the wrong types. Control frames are
    /// classified on key presence alone and never fail.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                json_kind(&value)
            )));
        };

        if object.contains_key("result") || object.contains_key("error") {
            let response: ControlResponse = serde_json::from_value(value)?;
            return Ok(InboundFrame::ControlAck(response));
        }

        let event: TickerEvent = serde_json::from_value(value)?;
        if event.is_ticker() {
            Ok(InboundFrame::Ticker(event))
        } else {
            Ok(InboundFrame::Unrecognized {
                event_type: event.event_type,
            })
        }
    }

    /// Project a ticker event into the subscriber payload.
    #[must_use]
    pub fn project(&self, event: &TickerEvent) -> PriceUpdate {
        PriceUpdate::from(event)
    }

    /// Encode a control request to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, request: &StreamRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
