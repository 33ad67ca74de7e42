//! Application Layer - Port definitions.
//!
//! This layer defines the contracts between the broadcast core and the
//! transports that carry payloads to subscribers.

/// Port interfaces for downstream delivery.
pub mod ports;
