//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the ambient
//! concerns (configuration, metrics, telemetry).

/// lemon.markets stream client (codec, backoff, supervisor).
pub mod lemon;

/// WebSocket transport adapter.
pub mod websocket;

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
