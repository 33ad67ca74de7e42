//! Session Restart Policy
//!
//! Exponential backoff with jitter between upstream sessions. The session
//! itself never reconnects; the entry point consults this policy after a
//! session ends with a fatal error and decides whether to start another.

use std::time::Duration;

use rand::Rng;

/// Configuration for restart behavior.
#[derive(Debug, Clone)]
pub struct RestartConfig {
    /// Delay before the first restart.
    pub initial_delay: Duration,
    /// Upper bound on the delay between restarts.
    pub max_delay: Duration,
    /// Growth factor applied after each restart.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Maximum consecutive restarts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

/// Error type for restart decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RestartError {
    /// Consecutive restart budget used up.
    #[error("session restart limit ({0}) reached")]
    Exhausted(u32),
}

/// Backoff state across consecutive session failures.
#[derive(Debug)]
pub struct RestartPolicy {
    config: RestartConfig,
    current_delay: Duration,
    attempts: u32,
}

impl RestartPolicy {
    /// Create a new restart policy.
    #[must_use]
    pub const fn new(config: RestartConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempts: 0,
        }
    }

    /// Delay to wait before the next restart.
    ///
    /// # Errors
    ///
    /// Returns `RestartError::Exhausted` once `max_attempts` consecutive
    /// restarts have been handed out.
    pub fn next_delay(&mut self) -> Result<Duration, RestartError> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return Err(RestartError::Exhausted(self.config.max_attempts));
        }
        self.attempts += 1;

        let delay = self.jittered(self.current_delay);
        self.current_delay = self.grown(self.current_delay);
        Ok(delay)
    }

    /// Forget past failures, typically after a session reached streaming.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Consecutive restarts handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn grown(&self, delay: Duration) -> Duration {
        let scaled = delay.as_secs_f64() * self.config.multiplier;
        if !scaled.is_finite() || scaled <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        #[allow(clippy::cast_precision_loss)]
        let base_millis = delay.as_millis() as f64;
        let spread = base_millis * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        let adjusted = (base_millis + offset).round().max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_millis = adjusted as u64;
        Duration::from_millis(adjusted_millis)
    }
}
