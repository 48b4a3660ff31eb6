//! Lemon Stream Binary
//!
//! Subscribes a list of instruments on both lemon.markets streams and logs
//! every tick, quote and stream error until shut down.
//!
//! # Usage
//!
//! ```bash
//! LEMON_ISINS=DE000TUAG000,US88160R1014 cargo run --bin lemon-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `LEMON_ISINS`: Comma separated ISINs to subscribe
//!
//! ## Optional
//! - `LEMON_TICKS_URL` / `LEMON_QUOTES_URL`: Stream endpoints
//! - `LEMON_RECONNECT_MIN_DELAY_SECS`: Reconnect delay floor (default: 5)
//! - `LEMON_RECONNECT_STEP_SECS`: Delay added per failed dial (default: 60)
//! - `LEMON_RECONNECT_MAX_DELAY_SECS`: Reconnect delay cap (default: 300)
//! - `LEMON_RECONNECT_MAX_COUNTER`: Failure counter cap (default: 5)
//! - `LEMON_RECONNECT_JITTER`: Jitter factor (default: 0.0)
//! - `LEMON_CONNECT_TIMEOUT_SECS`: Dial timeout (default: 10)
//! - `LEMON_SEND_TIMEOUT_MS`: Control message write timeout (default: 5000)
//! - `LEMON_CLOSE_TIMEOUT_MS`: Close timeout (default: 1000)
//! - `LEMON_METRICS_PORT`: Prometheus metrics port (default: 0 = disabled)
//! - `LEMON_IGNORE_TRADING_HOURS`: Connect while the venue is closed (default: false)
//! - `LEMON_CHANNEL_CAPACITY`: Update channel capacity (default: 1024)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: lemon-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use lemon_stream::infrastructure::telemetry;
use lemon_stream::{
    AppConfig, FeedProfile, Quote, QuoteStream, StreamConfig, StreamError, StreamSinks, Tick,
    TickStream, init_metrics, is_exchange_open, next_opening,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bound on draining the logging tasks at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting lemon.markets stream client");

    let config = AppConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        init_metrics(addr).context("failed to start metrics exporter")?;
        tracing::info!(%addr, "Prometheus metrics listening");
    }

    if !wait_for_opening(config.ignore_trading_hours).await {
        tracing::info!("Shut down before the venue opened");
        return Ok(());
    }

    let stream_config = StreamConfig::from_settings(&config.stream);
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(config.channel_capacity);
    let (quote_tx, quote_rx) = mpsc::channel::<Quote>(config.channel_capacity);
    let (error_tx, error_rx) = mpsc::channel::<StreamError>(256);

    let ticks = TickStream::connect(
        FeedProfile::ticks().with_url(&config.stream.feeds.ticks_url),
        stream_config.clone(),
        StreamSinks::new(tick_tx, error_tx.clone()),
    )
    .await
    .context("failed to connect to the ticks stream")?;

    let quotes = QuoteStream::connect(
        FeedProfile::quotes().with_url(&config.stream.feeds.quotes_url),
        stream_config,
        StreamSinks::new(quote_tx, error_tx),
    )
    .await
    .context("failed to connect to the quotes stream")?;

    for isin in &config.isins {
        ticks.subscribe(isin.clone());
        quotes.subscribe(isin.clone());
    }

    let consumers = [
        tokio::spawn(log_ticks(tick_rx)),
        tokio::spawn(log_quotes(quote_rx)),
        tokio::spawn(log_errors(error_rx)),
    ];

    tracing::info!(instruments = config.isins.len(), "Streams ready");

    await_shutdown().await;

    tokio::join!(ticks.disconnect(), quotes.disconnect());
    drop(ticks);
    drop(quotes);
    drain(consumers).await;

    tracing::info!("Streams stopped");
    Ok(())
}

async fn log_ticks(mut rx: mpsc::Receiver<Tick>) {
    while let Some(tick) = rx.recv().await {
        tracing::info!(
            isin = %tick.isin,
            price = %tick.price,
            quantity = tick.quantity,
            trade = tick.was_trade(),
            "Tick"
        );
    }
}

async fn log_quotes(mut rx: mpsc::Receiver<Quote>) {
    while let Some(quote) = rx.recv().await {
        tracing::info!(
            isin = %quote.isin,
            bid = %quote.bid,
            ask = %quote.ask,
            bid_size = quote.bid_size,
            ask_size = quote.ask_size,
            spread = %quote.spread(),
            "Quote"
        );
    }
}

async fn log_errors(mut rx: mpsc::Receiver<StreamError>) {
    while let Some(error) = rx.recv().await {
        if error.is_connection_fatal() {
            tracing::warn!(error = %error, kind = error.kind(), "Stream connection error");
        } else {
            tracing::error!(error = %error, kind = error.kind(), "Stream error");
        }
    }
}

async fn drain(consumers: [JoinHandle<()>; 3]) {
    let all = futures_util::future::join_all(consumers);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, all).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Consumers did not drain in time"
        );
    }
}

/// Wait for the venue to open unless told not to.
///
/// Returns `false` if a shutdown signal arrived first.
async fn wait_for_opening(ignore_trading_hours: bool) -> bool {
    let now = Utc::now();
    if is_exchange_open(&now) {
        return true;
    }

    let Some(opening) = next_opening(&now) else {
        return true;
    };

    if ignore_trading_hours {
        tracing::warn!(next_opening = %opening, "Venue is closed, streams stay silent until it opens");
        return true;
    }

    let wait = (opening.with_timezone(&Utc) - now)
        .to_std()
        .unwrap_or_default();
    tracing::warn!(
        next_opening = %opening,
        wait_secs = wait.as_secs(),
        "Venue is closed, waiting for it to open"
    );

    tokio::select! {
        () = tokio::time::sleep(wait) => true,
        () = await_shutdown() => false,
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        instruments = config.isins.len(),
        metrics_port = config.metrics_port,
        ignore_trading_hours = config.ignore_trading_hours,
        "Configuration loaded"
    );
    tracing::debug!(
        ticks_url = %config.stream.feeds.ticks_url,
        quotes_url = %config.stream.feeds.quotes_url,
        min_delay_secs = config.stream.reconnect.min_delay.as_secs(),
        max_delay_secs = config.stream.reconnect.max_delay.as_secs(),
        "Stream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
