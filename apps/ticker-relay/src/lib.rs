#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Ticker Relay - Market Data Fan-out
//!
//! Maintains a single connection to Binance's ticker stream and fans
//! normalized price updates out to any number of WebSocket subscribers.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: symbols, price updates, shared broadcast frames
//!   - `subscriber`: the registry of active sinks
//!
//! - **Application**: Port definitions
//!   - `ports`: the `Sink` interface the broadcast engine writes to
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: upstream session, codec, keepalive
//!   - `broadcast`: queue and fan-out engine
//!   - `downstream`: WebSocket subscriber endpoint
//!   - `http`: axum server, health and metrics endpoints
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                                                      +--> Subscriber 1
//! Binance WS --> Session --> Queue --> Broadcast Engine +--> Subscriber 2
//!               (decode,     (bounded)   (snapshot,     +--> Subscriber N
//!                project)                 fan-out)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{BroadcastFrame, InvalidSymbol, PriceUpdate, TickerSymbol};
pub use domain::subscriber::{RegistryStats, SinkId, SubscriberRegistry};

// Ports
pub use application::ports::{DeliveryError, SharedSinkRegistry, Sink, SinkRegistry};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, RelayConfig, RestartSettings, ServerSettings,
    UpstreamSettings,
};

// Upstream session
pub use infrastructure::binance::{
    SessionEnd, SessionError, SessionState, SessionStatus, UpstreamConfig, UpstreamSession,
};

// Broadcast engine
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastEngine, BroadcastStats, PublishError, Publisher, broadcast_channel,
};

// Subscriber endpoint
pub use infrastructure::downstream::{WebSocketSink, serve_subscriber};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
