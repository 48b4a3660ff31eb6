#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::items_after_statements
    )
)]

//! Lemon Stream - Resilient lemon.markets Market Data Client
//!
//! Keeps tick and quote subscriptions to the lemon.markets WebSocket
//! streams alive across disconnects and forwards decoded updates into
//! caller-owned channels.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Plain data and rules, no I/O
//!   - `instrument`, `market`: ISINs, ticks and quotes
//!   - `subscription`: The registry replayed after every reconnect
//!   - `connection`: Connection lifecycle states
//!   - `error`: Stream error taxonomy
//!   - `calendar`: Venue opening hours
//!
//! - **Application**: Port definitions
//!   - `ports`: The duplex transport the supervisor drives
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `lemon`: Codec, backoff policy and the stream supervisor
//!   - `websocket`: `tokio-tungstenite` transport
//!   - `config`, `metrics`, `telemetry`: Ambient concerns
//!
//! # Data Flow
//!
//! ```text
//!                       ┌──────────────┐   updates   ┌──────────────┐
//! lemon.markets WS ────►│ MarketStream │────────────►│ caller sink  │
//!                  ◄────│ (supervisor) │────────────►│ error sink   │
//!   subscribe/replay    └──────────────┘   errors    └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::calendar::{is_exchange_open, next_opening};
pub use domain::connection::ConnectionState;
pub use domain::error::StreamError;
pub use domain::instrument::InstrumentId;
pub use domain::market::{DataUpdate, FeedKind, MarketUpdate, Quote, Tick};
pub use domain::subscription::SubscriptionRegistry;

// Ports
pub use application::ports::{Connection, Connector, FrameSink, FrameSource, TransportError};

// Streams
pub use infrastructure::lemon::{
    FeedProfile, MarketStream, QuoteStream, StreamConfig, StreamSinks, TickStream,
};
pub use infrastructure::websocket::WsConnector;

// Infrastructure config
pub use infrastructure::config::{
    AppConfig, ConfigError, ConnectionSettings, FeedSettings, ReconnectSettings, StreamSettings,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
