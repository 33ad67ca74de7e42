//! Keepalive Monitor
//!
//! Binance drives keepalive from the server side: it sends a Ping probe
//! periodically and closes the connection if no Pong arrives in time. The
//! relay therefore never pings; it answers probes and watches for an
//! upstream that has gone silent.
//!
//! The monitor is owned by the session task and needs no synchronization.

use std::time::{Duration, Instant};

/// Configuration for keepalive behavior.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Deadline for writing a Pong after a Ping arrives.
    pub pong_deadline: Duration,
    /// Interval between inactivity checks.
    pub check_interval: Duration,
    /// Inactivity after which the session is considered stale.
    /// `None` disables the watchdog.
    pub stale_after: Option<Duration>,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            pong_deadline: Duration::from_secs(1),
            check_interval: Duration::from_secs(30),
            stale_after: Some(Duration::from_secs(90)),
        }
    }
}

impl KeepaliveConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        pong_deadline: Duration,
        check_interval: Duration,
        stale_after: Option<Duration>,
    ) -> Self {
        Self {
            pong_deadline,
            check_interval,
            stale_after,
        }
    }
}

/// Error type for keepalive checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeepaliveError {
    /// No frame of any kind arrived within the stale window.
    #[error("no upstream activity for {0:?}")]
    Stale(Duration),
}

/// Keepalive bookkeeping for one connection.
#[derive(Debug)]
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
    last_activity: Instant,
    last_probe: Option<Instant>,
    probes_answered: u64,
    deadlines_missed: u64,
}

impl KeepaliveMonitor {
    /// Create a monitor for a connection that just opened.
    #[must_use]
    pub fn new(config: KeepaliveConfig) -> Self {
        Self::started_at(config, Instant::now())
    }

    /// Create a monitor with an explicit start instant.
    #[must_use]
    pub const fn started_at(config: KeepaliveConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            last_probe: None,
            probes_answered: 0,
            deadlines_missed: 0,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &KeepaliveConfig {
        &self.config
    }

    /// Record that a frame of any kind arrived.
    pub const fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Record that a Ping probe arrived.
    pub const fn record_probe(&mut self, now: Instant) {
        self.last_activity = now;
        self.last_probe = Some(now);
    }

    /// Record that a Pong was written within the deadline.
    pub const fn record_answered(&mut self) {
        self.probes_answered += 1;
    }

    /// Record that a Pong could not be written within the deadline.
    pub const fn record_deadline_missed(&mut self) {
        self.deadlines_missed += 1;
    }

    /// Instant of the last probe, if any arrived.
    #[must_use]
    pub const fn last_probe(&self) -> Option<Instant> {
        self.last_probe
    }

    /// Probes answered on this connection.
    #[must_use]
    pub const fn probes_answered(&self) -> u64 {
        self.probes_answered
    }

    /// Pong deadlines missed on this connection.
    #[must_use]
    pub const fn deadlines_missed(&self) -> u64 {
        self.deadlines_missed
    }

    /// Time since the last frame.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Check the inactivity watchdog.
    ///
    /// # Errors
    ///
    /// Returns `KeepaliveError::Stale` if the connection has been idle longer
    /// than `stale_after`.
    pub fn check(&self, now: Instant) -> Result<(), KeepaliveError> {
        let Some(limit) = self.config.stale_after else {
            return Ok(());
        };
        let idle = self.idle_for(now);
        if idle > limit {
            tracing::warn!(
                idle_secs = idle.as_secs(),
                stale_after_secs = limit.as_secs(),
                last_probe_secs_ago = self
                    .last_probe()
                    .map(|probe| now.saturating_duration_since(probe).as_secs()),
                "Upstream inactivity timeout"
            );
            return Err(KeepaliveError::Stale(idle));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    fn config(stale_after: Option<Duration>) -> KeepaliveConfig {
        KeepaliveConfig::new(
            Duration::from_millis(100),
            Duration::from_millis(50),
            stale_after,
        )
    }

    #[test]
    fn default_config_values() {
        let config = KeepaliveConfig::default();
        assert_eq!(config.pong_deadline, Duration::from_secs(1));
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.stale_after, Some(Duration::from_secs(90)));
    }

    #[test]
    fn fresh_monitor_is_healthy() {
        let start = Instant::now();
        let monitor = KeepaliveMonitor::started_at(config(Some(Duration::from_secs(1))), start);
        assert_ok!(monitor.check(start));
        assert!(monitor.last_probe().is_none());
        assert_eq!(monitor.probes_answered(), 0);
    }

    #[test]
    fn stale_after_inactivity() {
        let start = Instant::now();
        let monitor = KeepaliveMonitor::started_at(config(Some(Duration::from_secs(1))), start);

        let later = start + Duration::from_secs(2);
        assert_eq!(
            monitor.check(later),
            Err(KeepaliveError::Stale(Duration::from_secs(2)))
        );
    }

    #[test]
    fn activity_resets_watchdog() {
        let start = Instant::now();
        let mut monitor =
            KeepaliveMonitor::started_at(config(Some(Duration::from_secs(1))), start);

        monitor.record_activity(start + Duration::from_millis(900));
        assert_ok!(monitor.check(start + Duration::from_millis(1500)));
    }

    #[test]
    fn probe_counts_as_activity() {
        let start = Instant::now();
        let mut monitor =
            KeepaliveMonitor::started_at(config(Some(Duration::from_secs(1))), start);

        let probe_at = start + Duration::from_millis(800);
        monitor.record_probe(probe_at);
        monitor.record_answered();

        assert_eq!(monitor.last_probe(), Some(probe_at));
        assert_eq!(monitor.probes_answered(), 1);
        assert_ok!(monitor.check(start + Duration::from_millis(1500)));
    }

    #[test]
    fn stale_is_measured_from_last_probe() {
        let start = Instant::now();
        let mut monitor =
            KeepaliveMonitor::started_at(config(Some(Duration::from_secs(1))), start);

        monitor.record_probe(start + Duration::from_millis(500));

        assert_eq!(
            monitor.check(start + Duration::from_millis(2000)),
            Err(KeepaliveError::Stale(Duration::from_millis(1500)))
        );
    }

    #[test]
    fn disabled_watchdog_never_fires() {
        let start = Instant::now();
        let monitor = KeepaliveMonitor::started_at(config(None), start);
        assert!(monitor.check(start + Duration::from_secs(3600)).is_ok());
    }

    #[test]
    fn missed_deadlines_are_counted() {
        let mut monitor = KeepaliveMonitor::new(config(None));
        monitor.record_deadline_missed();
        monitor.record_deadline_missed();
        assert_eq!(monitor.deadlines_missed(), 2);
    }
}
