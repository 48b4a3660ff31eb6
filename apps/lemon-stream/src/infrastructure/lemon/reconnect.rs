//! Reconnection Policy
//!
//! Linear backoff for WebSocket reconnection. lemon.markets rate-limits
//! and briefly blocks reconnect storms, so the delay grows by one step per
//! consecutive failed dial and levels off at a cap.
//!
//! ```text
//! delay(counter) = clamp(counter × step, min_delay, max_delay)
//! ```
//!
//! The counter is capped at `max_counter` and reset after every
//! successful connect. Retrying never stops; only the wait is capped.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Lower bound for every delay, including a retry right after a drop.
    pub min_delay: Duration,
    /// Delay added per consecutive failed dial.
    pub step: Duration,
    /// Upper bound for every delay.
    pub max_delay: Duration,
    /// Cap for the consecutive failure counter.
    pub max_counter: u32,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            step: Duration::from_secs(60),
            max_delay: Duration::from_secs(300),
            max_counter: 5,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `ReconnectSettings`.
    #[must_use]
    pub const fn from_settings(settings: &crate::ReconnectSettings) -> Self {
        Self {
            min_delay: settings.min_delay,
            step: settings.step,
            max_delay: settings.max_delay,
            max_counter: settings.max_counter,
            jitter_factor: settings.jitter_factor,
        }
    }

    /// Delay for a given failure counter, without jitter.
    #[must_use]
    pub fn delay_for(&self, counter: u32) -> Duration {
        self.step
            .saturating_mul(counter.min(self.max_counter))
            .max(self.min_delay)
            .min(self.max_delay)
    }
}

/// Reconnection policy tracking consecutive failed dials.
///
/// # Example
///
/// ```rust
/// use lemon_stream::infrastructure::lemon::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// // Right after a dropped connection
/// assert_eq!(policy.current_delay(), Duration::from_secs(5));
///
/// // After a failed dial
/// policy.record_failure();
/// assert_eq!(policy.current_delay(), Duration::from_secs(60));
///
/// // Successful connect
/// policy.reset();
/// assert_eq!(policy.counter(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    counter: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, counter: 0 }
    }

    /// Delay to wait before the next dial.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.apply_jitter(self.config.delay_for(self.counter))
    }

    /// Record a failed dial, returning the new counter.
    pub fn record_failure(&mut self) -> u32 {
        self.counter = self.counter.saturating_add(1).min(self.config.max_counter);
        self.counter
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.counter = 0;
    }

    /// Consecutive failed dials since the last success (capped).
    #[must_use]
    pub const fn counter(&self) -> u32 {
        self.counter
    }

    /// Apply jitter to a duration, never exceeding `max_delay`.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64).min(self.config.max_delay)
    }
}
