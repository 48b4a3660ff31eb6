//! Prometheus Metrics Module
//!
//! Exposes stream metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Payloads received and updates delivered, per feed
//! - **Errors**: Stream errors by kind
//! - **Connections**: Connection state and reconnect attempts
//! - **Subscriptions**: Active subscription counts
//! - **Latency**: Payload processing time
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder, so
//! library users that never call it pay nothing.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::ConnectionState;
use crate::domain::error::StreamError;
use crate::domain::market::FeedKind;

// =============================================================================
// Exporter
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Subsequent calls are no-ops.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or the recorder cannot be installed.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    let _ = INSTALLED.set(addr);
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "lemon_stream_messages_received_total",
        "Total payloads read from lemon.markets streams"
    );
    describe_counter!(
        "lemon_stream_updates_delivered_total",
        "Total decoded updates delivered to the update sink"
    );
    describe_counter!(
        "lemon_stream_errors_total",
        "Total stream errors by kind"
    );
    describe_counter!(
        "lemon_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "lemon_stream_connection_state",
        "Connection state (0 initializing, 1 connecting, 2 connected, 3 waiting, 4 disconnected)"
    );
    describe_gauge!(
        "lemon_stream_subscriptions",
        "Number of subscribed instruments"
    );
    describe_histogram!(
        "lemon_stream_message_processing_seconds",
        "Time from payload read to update delivery"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Initializing => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::WaitingToReconnect => 3.0,
        ConnectionState::Disconnected => 4.0,
    }
}

/// Record a payload read from a feed.
pub fn record_message_received(feed: FeedKind) {
    counter!(
        "lemon_stream_messages_received_total",
        "feed" => feed.as_str()
    )
    .increment(1);
}

/// Record an update handed to the update sink.
pub fn record_update_delivered(feed: FeedKind) {
    counter!(
        "lemon_stream_updates_delivered_total",
        "feed" => feed.as_str()
    )
    .increment(1);
}

/// Record a stream error.
pub fn record_stream_error(feed: FeedKind, error: &StreamError) {
    counter!(
        "lemon_stream_errors_total",
        "feed" => feed.as_str(),
        "kind" => error.kind()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: FeedKind) {
    counter!(
        "lemon_stream_reconnects_total",
        "feed" => feed.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(feed: FeedKind, state: ConnectionState) {
    gauge!(
        "lemon_stream_connection_state",
        "feed" => feed.as_str()
    )
    .set(state_value(state));
}

/// Update the subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(feed: FeedKind, count: usize) {
    gauge!(
        "lemon_stream_subscriptions",
        "feed" => feed.as_str()
    )
    .set(count as f64);
}

/// Record payload processing duration.
pub fn record_processing_duration(feed: FeedKind, duration: Duration) {
    histogram!(
        "lemon_stream_message_processing_seconds",
        "feed" => feed.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
