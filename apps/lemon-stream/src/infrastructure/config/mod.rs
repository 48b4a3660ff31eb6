//! Configuration Module
//!
//! Environment-driven settings for the streams and the binary.

mod settings;

pub use settings::{
    AppConfig, ConfigError, ConnectionSettings, FeedSettings, ReconnectSettings, StreamSettings,
};
