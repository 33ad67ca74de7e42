//! Binance WebSocket Message Types
//!
//! Wire format types for the Binance spot raw stream endpoint.
//!
//! # Message Types
//!
//! ## Control Messages
//! - `StreamRequest`: SUBSCRIBE / UNSUBSCRIBE sent by the relay
//! - `ControlResponse`: `{"result":null,"id":1}` acknowledgement or
//!   `{"error":{...},"id":1}` rejection
//!
//! ## Market Data
//! - `TickerEvent`: individual symbol 24hr rolling window ticker
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

use serde::{Deserialize, Serialize};

use crate::domain::streaming::PriceUpdate;

/// Event type tag carried by 24hr ticker frames.
pub const TICKER_EVENT_TYPE: &str = "24hrTicker";

// =============================================================================
// Control Messages
// =============================================================================

/// Stream control method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamMethod {
    /// Start receiving the named streams.
    Subscribe,
    /// Stop receiving the named streams.
    Unsubscribe,
}

/// Subscribe or unsubscribe request.
///
/// # Wire Format (JSON)
/// ```json
/// {"method":"SUBSCRIBE","params":["btcusdt@ticker"],"id":1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Request method.
    pub method: StreamMethod,
    /// Stream names.
    pub params: Vec<String>,
    /// Request id echoed back in the response.
    pub id: u64,
}

impl StreamRequest {
    /// Create a subscribe request for one stream.
    #[must_use]
    pub fn subscribe(stream: impl Into<String>, id: u64) -> Self {
        Self {
            method: StreamMethod::Subscribe,
            params: vec![stream.into()],
            id,
        }
    }

    /// Create an unsubscribe request for one stream.
    #[must_use]
    pub fn unsubscribe(stream: impl Into<String>, id: u64) -> Self {
        Self {
            method: StreamMethod::Unsubscribe,
            params: vec![stream.into()],
            id,
        }
    }
}

/// Response to a control request.
///
/// Fields are kept as raw JSON so that any frame carrying a `result` or
/// `error` key is accepted, whatever shape the server gives its id or error.
///
/// # Wire Format (JSON)
/// ```json
/// {"result":null,"id":1}
/// {"error":{"code":2,"msg":"Invalid request"},"id":1}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Request id as sent back by the server.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Result payload; `null` for a successful subscribe.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error body for a rejected request.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ControlResponse {
    /// Check if the server rejected the request.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The error body, when it has the documented `code`/`msg` shape.
    #[must_use]
    pub fn rejection(&self) -> Option<ControlError> {
        self.error
            .as_ref()
            .and_then(|body| ControlError::deserialize(body).ok())
    }
}

/// Error body of a rejected control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub msg: String,
}

// =============================================================================
// Ticker Event
// =============================================================================

/// Individual symbol 24hr ticker.
///
/// Every field defaults when absent so that other event shapes still decode
/// and are then filtered by `event_type`. Decimal values stay as strings.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "24hrTicker", "E": 1700000000000, "s": "BTCUSDT",
///   "p": "0.0015", "P": "250.00", "w": "0.0018", "c": "0.0025",
///   "Q": "10", "o": "0.0010", "h": "0.0025", "l": "0.0010",
///   "v": "10000", "q": "18", "O": 0, "C": 86400000,
///   "F": 0, "L": 18150, "n": 18151
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerEvent {
    /// Event type (`24hrTicker`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time in epoch milliseconds.
    #[serde(rename = "E")]
    pub event_time: i64,

    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Absolute price change.
    #[serde(rename = "p")]
    pub price_change: String,

    /// Price change percent.
    #[serde(rename = "P")]
    pub price_change_percent: String,

    /// Weighted average price.
    #[serde(rename = "w")]
    pub weighted_avg_price: String,

    /// Last price.
    #[serde(rename = "c")]
    pub last_price: String,

    /// Last quantity.
    #[serde(rename = "Q")]
    pub last_quantity: String,

    /// Open price.
    #[serde(rename = "o")]
    pub open_price: String,

    /// High price.
    #[serde(rename = "h")]
    pub high_price: String,

    /// Low price.
    #[serde(rename = "l")]
    pub low_price: String,

    /// Total traded base asset volume.
    #[serde(rename = "v")]
    pub volume: String,

    /// Total traded quote asset volume.
    #[serde(rename = "q")]
    pub quote_volume: String,

    /// Statistics open time.
    #[serde(rename = "O")]
    pub open_time: i64,

    /// Statistics close time.
    #[serde(rename = "C")]
    pub close_time: i64,

    /// First trade id.
    #[serde(rename = "F")]
    pub first_trade_id: i64,

    /// Last trade id.
    #[serde(rename = "L")]
    pub last_trade_id: i64,

    /// Total number of trades.
    #[serde(rename = "n")]
    pub trade_count: u64,
}

impl TickerEvent {
    /// Check if this is a 24hr ticker event.
    #[must_use]
    pub fn is_ticker(&self) -> bool {
        self.event_type == TICKER_EVENT_TYPE
    }
}

impl From<&TickerEvent> for PriceUpdate {
    fn from(event: &TickerEvent) -> Self {
        Self {
            symbol: event.symbol.clone(),
            price: event.last_price.clone(),
            change: event.price_change_percent.clone(),
            volume: event.volume.clone(),
            timestamp: event.event_time,
        }
    }
}
