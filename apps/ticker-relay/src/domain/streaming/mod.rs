//! Market Data Streaming Types
//!
//! Core domain types for the relayed price feed: the symbol being streamed,
//! the normalized price update sent to subscribers, and the encoded frame
//! shared read-only across every subscriber of one broadcast.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Ticker Symbol
// =============================================================================

/// A validated trading pair symbol such as `BTCUSDT`.
///
/// Stored upper-cased. Upstream stream names use the lower-cased form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TickerSymbol(String);

impl TickerSymbol {
    /// Parse a symbol, accepting any case.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSymbol` if the input is empty or contains anything
    /// other than ASCII letters and digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidSymbol> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidSymbol(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The upper-cased symbol.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the 24h ticker stream for this symbol, e.g. `btcusdt@ticker`.
    #[must_use]
    pub fn ticker_stream(&self) -> String {
        format!("{}@ticker", self.0.to_ascii_lowercase())
    }
}

impl Default for TickerSymbol {
    /// `BTCUSDT`.
    fn default() -> Self {
        Self("BTCUSDT".to_string())
    }
}

impl fmt::Display for TickerSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejected symbol input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ticker symbol: {0:?}")]
pub struct InvalidSymbol(pub String);

// =============================================================================
// Price Update
// =============================================================================

/// Normalized price update delivered to subscribers.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol":"BTCUSDT","price":"65000.10","change":"1.23","volume":"1000.5","timestamp":1700000000000}
/// ```
///
/// Decimal fields are carried exactly as the exchange sent them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Trading pair symbol.
    pub symbol: String,
    /// Last trade price.
    pub price: String,
    /// 24h price change percent.
    pub change: String,
    /// 24h base asset volume.
    pub volume: String,
    /// Event time in epoch milliseconds.
    pub timestamp: i64,
}

impl PriceUpdate {
    /// Event time as a UTC datetime, if it is in range.
    #[must_use]
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Serialize into a frame that can be shared across subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_frame(&self) -> Result<BroadcastFrame, serde_json::Error> {
        serde_json::to_string(self).map(BroadcastFrame::from)
    }
}

// =============================================================================
// Broadcast Frame
// =============================================================================

/// An encoded payload, serialized once and shared by reference count.
///
/// Cloning is cheap and never copies the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BroadcastFrame(Arc<str>);

impl BroadcastFrame {
    /// The encoded text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the encoded text in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for BroadcastFrame {
    fn from(text: String) -> Self {
        Self(Arc::from(text))
    }
}

impl From<&str> for BroadcastFrame {
    fn from(text: &str) -> Self {
        Self(Arc::from(text))
    }
}

impl fmt::Display for BroadcastFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn sample_update() -> PriceUpdate {
        PriceUpdate {
            symbol: "BTCUSDT".to_string(),
            price: "65000.10".to_string(),
            change: "1.23".to_string(),
            volume: "1000.5".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test_case("BTCUSDT", "BTCUSDT" ; "already upper")]
    #[test_case("btcusdt", "BTCUSDT" ; "lower case")]
    #[test_case(" ethBtc ", "ETHBTC" ; "mixed case with padding")]
    fn symbol_parse_normalizes(raw: &str, expected: &str) {
        assert_eq!(TickerSymbol::parse(raw).unwrap().as_str(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "blank")]
    #[test_case("btc@usdt" ; "stream separator")]
    #[test_case("btc/usdt" ; "slash")]
    fn symbol_parse_rejects(raw: &str) {
        assert!(TickerSymbol::parse(raw).is_err());
    }

    #[test]
    fn ticker_stream_is_lowercase() {
        let symbol = TickerSymbol::parse("BTCUSDT").unwrap();
        assert_eq!(symbol.ticker_stream(), "btcusdt@ticker");
    }

    #[test]
    fn frame_has_exact_wire_format() {
        let frame = sample_update().to_frame().unwrap();
        assert_eq!(
            frame.as_str(),
            r#"{"symbol":"BTCUSDT","price":"65000.10","change":"1.23","volume":"1000.5","timestamp":1700000000000}"#
        );
    }

    #[test]
    fn frame_clone_shares_text() {
        let frame = sample_update().to_frame().unwrap();
        let cloned = frame.clone();
        assert!(std::ptr::eq(frame.as_str(), cloned.as_str()));
    }

    #[test]
    fn event_time_from_millis() {
        let time = sample_update().event_time().unwrap();
        assert_eq!(time.timestamp_millis(), 1_700_000_000_000);
    }
}
