//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Unparseable numbers fall back to their defaults; an invalid symbol or
//! stream URL is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::streaming::{InvalidSymbol, TickerSymbol};
use crate::infrastructure::binance::{
    DEFAULT_STREAM_URL, KeepaliveConfig, RestartConfig, UpstreamConfig,
};

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Binance raw stream endpoint.
    pub url: String,
    /// Symbol whose 24hr ticker is relayed.
    pub symbol: TickerSymbol,
    /// Deadline for answering a Ping probe.
    pub pong_deadline: Duration,
    /// Interval between inactivity checks.
    pub keepalive_check_interval: Duration,
    /// Inactivity before the session is failed (`None` = never).
    pub stale_after: Option<Duration>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        let keepalive = KeepaliveConfig::default();
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            symbol: TickerSymbol::default(),
            pong_deadline: keepalive.pong_deadline,
            keepalive_check_interval: keepalive.check_interval,
            stale_after: keepalive.stale_after,
        }
    }
}

impl UpstreamSettings {
    /// Session configuration for these settings.
    #[must_use]
    pub fn session_config(&self) -> UpstreamConfig {
        UpstreamConfig::new(self.url.clone(), self.symbol.clone()).with_keepalive(
            KeepaliveConfig::new(
                self.pong_deadline,
                self.keepalive_check_interval,
                self.stale_after,
            ),
        )
    }
}

/// Broadcast queue settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Queue capacity (0 is raised to 1).
    pub queue_capacity: usize,
    /// Deadline for one delivery to one subscriber.
    pub sink_write_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            sink_write_timeout: Duration::from_secs(2),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port for `/ws`, health, metrics and static files.
    pub http_port: u16,
    /// Directory served for unmatched paths (`None` = disabled).
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8000,
            static_dir: Some(PathBuf::from("./static")),
        }
    }
}

/// Session restart settings.
#[derive(Debug, Clone)]
pub struct RestartSettings {
    /// Whether a failed session is restarted.
    pub enabled: bool,
    /// Maximum consecutive restarts (0 = unlimited).
    pub max_attempts: u32,
    /// Initial restart delay.
    pub delay_initial: Duration,
    /// Maximum restart delay.
    pub delay_max: Duration,
    /// Restart delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
        }
    }
}

impl RestartSettings {
    /// Backoff configuration for these settings.
    #[must_use]
    pub fn policy_config(&self) -> RestartConfig {
        RestartConfig {
            initial_delay: self.delay_initial,
            max_delay: self.delay_max,
            multiplier: self.delay_multiplier,
            max_attempts: self.max_attempts,
            ..RestartConfig::default()
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Broadcast queue settings.
    pub broadcast: BroadcastSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Session restart settings.
    pub restart: RestartSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol or stream URL is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol or stream URL is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let url = env
            .string("BINANCE_STREAM_URL")
            .unwrap_or(defaults.upstream.url);
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(url));
        }

        let symbol = match env.string("RELAY_SYMBOL") {
            Some(raw) => TickerSymbol::parse(&raw)?,
            None => defaults.upstream.symbol,
        };

        let stale_secs = env.parse(
            "RELAY_STALE_AFTER_SECS",
            defaults.upstream.stale_after.map_or(0, |d| d.as_secs()),
        );

        let upstream = UpstreamSettings {
            url,
            symbol,
            pong_deadline: env.millis("RELAY_PONG_DEADLINE_MS", defaults.upstream.pong_deadline),
            keepalive_check_interval: env.secs(
                "RELAY_KEEPALIVE_CHECK_INTERVAL_SECS",
                defaults.upstream.keepalive_check_interval,
            ),
            stale_after: (stale_secs > 0).then(|| Duration::from_secs(stale_secs)),
        };

        let broadcast = BroadcastSettings {
            queue_capacity: env
                .parse("RELAY_QUEUE_CAPACITY", defaults.broadcast.queue_capacity)
                .max(1),
            sink_write_timeout: env.millis(
                "RELAY_SINK_WRITE_TIMEOUT_MS",
                defaults.broadcast.sink_write_timeout,
            ),
        };

        let server = ServerSettings {
            http_port: env.parse("RELAY_HTTP_PORT", defaults.server.http_port),
            static_dir: match env.string("RELAY_STATIC_DIR") {
                Some(dir) if dir.is_empty() => None,
                Some(dir) => Some(PathBuf::from(dir)),
                None => defaults.server.static_dir,
            },
        };

        let restart = RestartSettings {
            enabled: env.flag("RELAY_RESTART_ENABLED", defaults.restart.enabled),
            max_attempts: env.parse("RELAY_RESTART_MAX_ATTEMPTS", defaults.restart.max_attempts),
            delay_initial: env.millis(
                "RELAY_RESTART_DELAY_INITIAL_MS",
                defaults.restart.delay_initial,
            ),
            delay_max: env.secs("RELAY_RESTART_DELAY_MAX_SECS", defaults.restart.delay_max),
            delay_multiplier: env.parse(
                "RELAY_RESTART_DELAY_MULTIPLIER",
                defaults.restart.delay_multiplier,
            ),
        };

        Ok(Self {
            upstream,
            broadcast,
            server,
            restart,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `RELAY_SYMBOL` is not a valid symbol.
    #[error("RELAY_SYMBOL: {0}")]
    InvalidSymbol(#[from] InvalidSymbol),
    /// `BINANCE_STREAM_URL` is not a WebSocket URL.
    #[error("BINANCE_STREAM_URL must start with ws:// or wss://, got {0:?}")]
    InvalidUrl(String),
}

/// Typed access over a key lookup.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.string(key).map_or(default, |v| {
            matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }
}
