//! Stream Configuration Settings
//!
//! Configuration types for the lemon.markets streams, loaded from
//! environment variables. Unparseable values fall back to defaults;
//! values that parse but contradict each other are rejected.

use std::time::Duration;

use crate::domain::instrument::InstrumentId;
use crate::infrastructure::lemon::{QUOTES_URL, TICKS_URL};

/// Stream endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Ticks stream URL.
    pub ticks_url: String,
    /// Quotes stream URL.
    pub quotes_url: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            ticks_url: TICKS_URL.to_string(),
            quotes_url: QUOTES_URL.to_string(),
        }
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Lower bound for every reconnect delay.
    pub min_delay: Duration,
    /// Delay added per consecutive failed dial.
    pub step: Duration,
    /// Upper bound for every reconnect delay.
    pub max_delay: Duration,
    /// Cap for the consecutive failure counter.
    pub max_counter: u32,
    /// Jitter factor (0.0 = none, 0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
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

/// Transport timeouts.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Bound on a single dial, including the TLS and WebSocket handshakes.
    pub connect_timeout: Duration,
    /// Bound on writing one control message.
    pub send_timeout: Duration,
    /// Bound on closing the transport.
    pub close_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_millis(5000),
            close_timeout: Duration::from_millis(1000),
        }
    }
}

/// Everything a stream needs.
#[derive(Debug, Clone, Default)]
pub struct StreamSettings {
    /// Stream endpoints.
    pub feeds: FeedSettings,
    /// Reconnection backoff.
    pub reconnect: ReconnectSettings,
    /// Transport timeouts.
    pub connection: ConnectionSettings,
}

impl StreamSettings {
    /// Load settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is empty or the settings are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is empty or the settings are inconsistent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let feeds = FeedSettings {
            ticks_url: parse_url(&lookup, "LEMON_TICKS_URL", defaults.feeds.ticks_url)?,
            quotes_url: parse_url(&lookup, "LEMON_QUOTES_URL", defaults.feeds.quotes_url)?,
        };

        let reconnect = ReconnectSettings {
            min_delay: parse_duration_secs(
                &lookup,
                "LEMON_RECONNECT_MIN_DELAY_SECS",
                defaults.reconnect.min_delay,
            ),
            step: parse_duration_secs(&lookup, "LEMON_RECONNECT_STEP_SECS", defaults.reconnect.step),
            max_delay: parse_duration_secs(
                &lookup,
                "LEMON_RECONNECT_MAX_DELAY_SECS",
                defaults.reconnect.max_delay,
            ),
            max_counter: parse_u32(
                &lookup,
                "LEMON_RECONNECT_MAX_COUNTER",
                defaults.reconnect.max_counter,
            ),
            jitter_factor: parse_f64(
                &lookup,
                "LEMON_RECONNECT_JITTER",
                defaults.reconnect.jitter_factor,
            ),
        };

        let connection = ConnectionSettings {
            connect_timeout: parse_duration_secs(
                &lookup,
                "LEMON_CONNECT_TIMEOUT_SECS",
                defaults.connection.connect_timeout,
            ),
            send_timeout: parse_duration_millis(
                &lookup,
                "LEMON_SEND_TIMEOUT_MS",
                defaults.connection.send_timeout,
            ),
            close_timeout: parse_duration_millis(
                &lookup,
                "LEMON_CLOSE_TIMEOUT_MS",
                defaults.connection.close_timeout,
            ),
        };

        let settings = Self {
            feeds,
            reconnect,
            connection,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check that the settings are consistent.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect.max_delay < self.reconnect.min_delay {
            return Err(ConfigError::Invalid {
                key: "LEMON_RECONNECT_MAX_DELAY_SECS",
                reason: format!(
                    "max delay {}s is below min delay {}s",
                    self.reconnect.max_delay.as_secs(),
                    self.reconnect.min_delay.as_secs()
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(ConfigError::Invalid {
                key: "LEMON_RECONNECT_JITTER",
                reason: format!("{} is outside 0.0..=1.0", self.reconnect.jitter_factor),
            });
        }
        if self.connection.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "LEMON_CONNECT_TIMEOUT_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.connection.send_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "LEMON_SEND_TIMEOUT_MS",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for the `lemon-stream` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Stream settings.
    pub stream: StreamSettings,
    /// Instruments to subscribe on both feeds.
    pub isins: Vec<InstrumentId>,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Connect even while the venue is closed.
    pub ignore_trading_hours: bool,
    /// Capacity of each update channel.
    pub channel_capacity: usize,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `LEMON_ISINS` is missing or empty, or if the
    /// stream settings are invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `LEMON_ISINS` is missing or empty, or if the
    /// stream settings are invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = lookup("LEMON_ISINS")
            .ok_or_else(|| ConfigError::MissingEnvVar("LEMON_ISINS".to_string()))?;

        let mut isins: Vec<InstrumentId> = Vec::new();
        for isin in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !isins.iter().any(|known| known.as_str() == isin) {
                isins.push(InstrumentId::from(isin));
            }
        }
        if isins.is_empty() {
            return Err(ConfigError::EmptyValue("LEMON_ISINS".to_string()));
        }

        Ok(Self {
            stream: StreamSettings::from_lookup(&lookup)?,
            isins,
            metrics_port: parse_u16(&lookup, "LEMON_METRICS_PORT", 0),
            ignore_trading_hours: parse_bool(&lookup, "LEMON_IGNORE_TRADING_HOURS", false),
            channel_capacity: parse_usize(&lookup, "LEMON_CHANNEL_CAPACITY", 1024).max(1),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Offending variable.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_url(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: String,
) -> Result<String, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Some(value) => Ok(value.trim().to_string()),
    }
}

fn parse_u16(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_f64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| {
        matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes")
    })
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
