//! Domain Layer - Core streaming types and subscriber bookkeeping.
//!
//! This layer contains the price update types that flow through the relay
//! and the registry of downstream sinks. Nothing here knows about
//! WebSockets or the upstream exchange.

/// Price feed types (symbols, normalized updates, encoded frames).
pub mod streaming;

/// Registry of active downstream sinks.
pub mod subscriber;
