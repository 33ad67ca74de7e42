//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Binance WebSocket client adapter.
pub mod binance;

/// Queue-fed fan-out to registered sinks.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Downstream WebSocket subscribers.
pub mod downstream;

/// HTTP server: subscriber upgrade, health, metrics, static files.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
