//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, RelayConfig, RestartSettings, ServerSettings,
    UpstreamSettings,
};
