//! Market Data Stream
//!
//! One [`MarketStream`] owns the single transport connection for one feed
//! (ticks or quotes) and keeps the caller's subscriptions alive across
//! disconnects.
//!
//! # Lifecycle
//!
//! - `connect` dials once. A failure is returned to the caller and nothing
//!   is retried.
//! - On success a supervisor task is spawned. It listens, forwards updates
//!   and errors into the caller's sinks, and when the connection drops it
//!   waits out the backoff delay and dials again, replaying every
//!   subscription after each successful connect.
//! - `disconnect` is terminal. It cancels any pending backoff or dial,
//!   closes the transport and waits for the supervisor to exit. No error is
//!   reported for a caller-initiated close.
//!
//! # Concurrency
//!
//! Connection state and the subscription registry share one lock, so
//! "is connected" and "what is subscribed" are always read together.
//! `subscribe`/`unsubscribe` never touch the socket: while connected they
//! queue a control message for the supervisor, which is the only reader
//! and the only writer of the live connection.
//!
//! Delivery awaits the caller's bounded sinks, so a slow consumer stalls
//! the stream, but every wait is raced against cancellation and can never
//! block `disconnect`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{Classification, LemonCodec};
use super::feed::FeedProfile;
use super::messages::ControlMessage;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Connection, Connector, FrameSink, TransportError};
use crate::domain::connection::ConnectionState;
use crate::domain::error::StreamError;
use crate::domain::instrument::InstrumentId;
use crate::domain::market::{FeedKind, MarketUpdate, Quote, Tick};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics;
use crate::infrastructure::websocket::WsConnector;

// =============================================================================
// Configuration
// =============================================================================

/// Timeouts and backoff for a stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Bound on a single dial.
    pub connect_timeout: Duration,
    /// Bound on writing one control message.
    pub send_timeout: Duration,
    /// Bound on closing the transport.
    pub close_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl StreamConfig {
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            reconnect: ReconnectConfig::from_settings(&settings.reconnect),
            connect_timeout: settings.connection.connect_timeout,
            send_timeout: settings.connection.send_timeout,
            close_timeout: settings.connection.close_timeout,
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Caller-owned egress channels.
///
/// The stream only ever sends into these; it never closes them.
#[derive(Debug)]
pub struct StreamSinks<U> {
    /// Decoded updates.
    pub updates: mpsc::Sender<U>,
    /// Stream errors, possibly shared across streams.
    pub errors: mpsc::Sender<StreamError>,
}

impl<U> StreamSinks<U> {
    /// Bundle an update sink and an error sink.
    #[must_use]
    pub const fn new(updates: mpsc::Sender<U>, errors: mpsc::Sender<StreamError>) -> Self {
        Self { updates, errors }
    }
}

impl<U> Clone for StreamSinks<U> {
    fn clone(&self) -> Self {
        Self {
            updates: self.updates.clone(),
            errors: self.errors.clone(),
        }
    }
}

// =============================================================================
// Supervisor internals
// =============================================================================

/// Control message queued for the supervisor.
#[derive(Debug)]
enum Command {
    Subscribe(InstrumentId),
    Unsubscribe(InstrumentId),
}

/// State guarded by one lock.
#[derive(Debug, Default)]
struct Shared {
    state: ConnectionState,
    registry: SubscriptionRegistry,
}

/// Why a listen session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Failed(TransportError),
}

/// Outcome of handing a value to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    SinkClosed,
    Cancelled,
}

fn classify_transport_error(error: &TransportError) -> StreamError {
    if error.is_graceful_close() {
        StreamError::ConnectionClosed
    } else {
        StreamError::Transport(error.to_string())
    }
}

struct Inner<U: MarketUpdate> {
    profile: FeedProfile<U>,
    config: StreamConfig,
    codec: LemonCodec,
    shared: Mutex<Shared>,
    raw_tap: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl<U: MarketUpdate> Inner<U> {
    const fn feed(&self) -> FeedKind {
        U::KIND
    }

    fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Move to `next` if the transition is legal. Never leaves `Disconnected`.
    fn transition(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut shared = self.shared.lock();
            let previous = shared.state;
            if !previous.can_transition_to(next) {
                return false;
            }
            shared.state = next;
            previous
        };

        tracing::debug!(feed = %self.feed(), from = %previous, to = %next, "Connection state changed");
        metrics::set_connection_state(self.feed(), next);
        true
    }

    /// Enter `Connected` and take the replay snapshot atomically.
    ///
    /// Queued commands predate the snapshot and are discarded; the registry
    /// already reflects them.
    fn mark_connected(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<Vec<InstrumentId>> {
        let replay = {
            let mut shared = self.shared.lock();
            if !shared.state.can_transition_to(ConnectionState::Connected) {
                return None;
            }
            while commands.try_recv().is_ok() {}
            shared.state = ConnectionState::Connected;
            shared.registry.snapshot()
        };

        tracing::info!(feed = %self.feed(), url = %self.profile.url, "Connected to lemon.markets stream");
        metrics::set_connection_state(self.feed(), ConnectionState::Connected);
        Some(replay)
    }

    /// Flip to `Disconnected` and cancel all pending work.
    ///
    /// Returns `false` if the stream was already disconnected.
    fn shutdown(&self) -> bool {
        let previous = {
            let mut shared = self.shared.lock();
            std::mem::replace(&mut shared.state, ConnectionState::Disconnected)
        };
        self.cancel.cancel();

        if previous.is_terminal() {
            return false;
        }
        tracing::info!(feed = %self.feed(), from = %previous, "Stream disconnected");
        metrics::set_connection_state(self.feed(), ConnectionState::Disconnected);
        true
    }

    async fn dial(&self, connector: &dyn Connector) -> Result<Connection, TransportError> {
        tracing::info!(feed = %self.feed(), url = %self.profile.url, "Connecting to lemon.markets stream");

        match tokio::time::timeout(self.config.connect_timeout, connector.connect(&self.profile.url))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Connect(format!(
                "timed out after {}ms",
                self.config.connect_timeout.as_millis()
            ))),
        }
    }

    async fn send_control(
        &self,
        sink: &mut dyn FrameSink,
        msg: &ControlMessage,
    ) -> Result<(), TransportError> {
        let json = self
            .codec
            .encode_control(msg)
            .map_err(|e| TransportError::Io(format!("failed to encode control message: {e}")))?;

        tracing::debug!(
            feed = %self.feed(),
            action = msg.action.as_str(),
            isin = %msg.isin,
            "Sending control message"
        );

        match tokio::time::timeout(self.config.send_timeout, sink.send_text(json)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::SendTimeout),
        }
    }

    async fn close(&self, connection: &mut Connection) {
        match tokio::time::timeout(self.config.close_timeout, connection.sink.close()).await {
            Ok(Ok(())) => tracing::debug!(feed = %self.feed(), "Transport closed"),
            Ok(Err(e)) => tracing::debug!(feed = %self.feed(), error = %e, "Transport close failed"),
            Err(_) => tracing::debug!(feed = %self.feed(), "Transport close timed out"),
        }
    }

    async fn deliver<T: Send>(&self, sink: &mpsc::Sender<T>, value: T, name: &'static str) -> Delivery {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Delivery::Cancelled,
            result = sink.send(value) => {
                if result.is_err() {
                    tracing::debug!(feed = %self.feed(), sink = name, "Sink closed, dropping message");
                    Delivery::SinkClosed
                } else {
                    Delivery::Sent
                }
            }
        }
    }

    /// Report an error unless the stream was shut down.
    ///
    /// Returns `false` if the caller should stop.
    async fn emit_error(&self, error: StreamError, sinks: &StreamSinks<U>) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        metrics::record_stream_error(self.feed(), &error);
        self.deliver(&sinks.errors, error, "errors").await != Delivery::Cancelled
    }

    /// Handle one payload. Returns `false` if the stream was shut down.
    async fn dispatch(&self, payload: Vec<u8>, sinks: &StreamSinks<U>) -> bool {
        let started = Instant::now();
        metrics::record_message_received(self.feed());

        match self.codec.classify(&payload) {
            Classification::ServerError(kind) => {
                let error = StreamError::from(kind);
                tracing::warn!(
                    feed = %self.feed(),
                    error = %error,
                    payload = %String::from_utf8_lossy(&payload),
                    "Server rejected request"
                );
                self.emit_error(error, sinks).await
            }
            Classification::Data => {
                let tap = self.raw_tap.lock().clone();
                if let Some(tap) = tap
                    && self.deliver(&tap, payload.clone(), "raw").await == Delivery::Cancelled
                {
                    return false;
                }

                match (self.profile.decode)(&self.codec, &payload) {
                    Ok(update) => {
                        tracing::trace!(feed = %self.feed(), isin = %update.instrument(), "Update received");
                        match self.deliver(&sinks.updates, update, "updates").await {
                            Delivery::Sent => {
                                metrics::record_update_delivered(self.feed());
                                metrics::record_processing_duration(self.feed(), started.elapsed());
                                true
                            }
                            Delivery::SinkClosed => true,
                            Delivery::Cancelled => false,
                        }
                    }
                    Err(e) => {
                        tracing::debug!(feed = %self.feed(), error = %e, "Failed to decode payload");
                        self.emit_error(StreamError::DecodeFailed(e.to_string()), sinks)
                            .await
                    }
                }
            }
        }
    }

    /// Replay subscriptions, then read and write until the connection fails
    /// or the stream is cancelled.
    async fn listen(
        &self,
        connection: &mut Connection,
        replay: &[InstrumentId],
        commands: &mut mpsc::UnboundedReceiver<Command>,
        sinks: &StreamSinks<U>,
    ) -> SessionEnd {
        for isin in replay {
            let msg = self.profile.subscribe_message(isin.clone());
            if let Err(error) = self.send_control(connection.sink.as_mut(), &msg).await {
                return SessionEnd::Failed(error);
            }
        }
        if !replay.is_empty() {
            tracing::info!(feed = %self.feed(), count = replay.len(), "Restored subscriptions");
        }

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return SessionEnd::Cancelled,
                Some(command) = commands.recv() => {
                    let msg = match command {
                        Command::Subscribe(isin) => self.profile.subscribe_message(isin),
                        Command::Unsubscribe(isin) => self.profile.unsubscribe_message(isin),
                    };
                    if let Err(error) = self.send_control(connection.sink.as_mut(), &msg).await {
                        return SessionEnd::Failed(error);
                    }
                }
                payload = connection.source.next_payload() => match payload {
                    Ok(payload) => {
                        if !self.dispatch(payload, sinks).await {
                            return SessionEnd::Cancelled;
                        }
                    }
                    Err(error) => return SessionEnd::Failed(error),
                },
            }
        }
    }

    /// Report a lost connection. Silent if the caller disconnected.
    async fn report_connection_loss(&self, error: &TransportError, sinks: &StreamSinks<U>) -> bool {
        if !self.transition(ConnectionState::WaitingToReconnect) {
            return false;
        }
        tracing::warn!(feed = %self.feed(), error = %error, "Connection lost");
        self.emit_error(classify_transport_error(error), sinks).await
    }

    /// Dial with backoff until connected or cancelled.
    async fn reconnect(
        &self,
        connector: &dyn Connector,
        policy: &mut ReconnectPolicy,
        sinks: &StreamSinks<U>,
    ) -> Option<Connection> {
        loop {
            let delay = policy.current_delay();
            tracing::info!(
                feed = %self.feed(),
                failures = policy.counter(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to lemon.markets stream"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            if !self.transition(ConnectionState::Connecting) {
                return None;
            }
            metrics::record_reconnect(self.feed());

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                result = self.dial(connector) => result,
            };

            match result {
                Ok(connection) => return Some(connection),
                Err(error) => {
                    if !self.transition(ConnectionState::WaitingToReconnect) {
                        return None;
                    }
                    let failures = policy.record_failure();
                    tracing::warn!(feed = %self.feed(), error = %error, failures, "Reconnect failed");

                    if !self
                        .emit_error(StreamError::ConnectFailed(error.to_string()), sinks)
                        .await
                    {
                        return None;
                    }
                }
            }
        }
    }

    /// Supervisor loop: listen, and reconnect whenever the connection drops.
    async fn run(
        self: Arc<Self>,
        connector: Arc<dyn Connector>,
        mut connection: Connection,
        mut replay: Vec<InstrumentId>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        sinks: StreamSinks<U>,
    ) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            let end = self
                .listen(&mut connection, &replay, &mut commands, &sinks)
                .await;
            self.close(&mut connection).await;

            let SessionEnd::Failed(error) = end else {
                break;
            };
            if !self.report_connection_loss(&error, &sinks).await {
                break;
            }

            let Some(next) = self.reconnect(connector.as_ref(), &mut policy, &sinks).await else {
                break;
            };
            connection = next;

            let Some(snapshot) = self.mark_connected(&mut commands) else {
                self.close(&mut connection).await;
                break;
            };
            policy.reset();
            replay = snapshot;
        }

        tracing::debug!(feed = %self.feed(), "Stream supervisor exited");
    }
}

// =============================================================================
// Market Stream
// =============================================================================

/// A reconnecting stream of one update kind.
///
/// # Example
///
/// ```rust,no_run
/// use lemon_stream::{StreamError, Tick, TickStream};
/// use tokio::sync::mpsc;
///
/// async fn example() -> Result<(), StreamError> {
///     let (tick_tx, mut tick_rx) = mpsc::channel::<Tick>(1024);
///     let (error_tx, mut error_rx) = mpsc::channel::<StreamError>(64);
///
///     let stream = TickStream::ticks(tick_tx, error_tx).await?;
///     stream.subscribe("DE000TUAG000");
///
///     while let Some(tick) = tick_rx.recv().await {
///         println!("{} @ {} (trade: {})", tick.isin, tick.price, tick.was_trade());
///     }
///
///     stream.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct MarketStream<U: MarketUpdate> {
    inner: Arc<Inner<U>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Stream of [`Tick`] updates.
pub type TickStream = MarketStream<Tick>;

/// Stream of [`Quote`] updates.
pub type QuoteStream = MarketStream<Quote>;

impl MarketStream<Tick> {
    /// Connect to the ticks stream with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectFailed`] if the first dial fails.
    pub async fn ticks(
        updates: mpsc::Sender<Tick>,
        errors: mpsc::Sender<StreamError>,
    ) -> Result<Self, StreamError> {
        Self::connect(
            FeedProfile::ticks(),
            StreamConfig::default(),
            StreamSinks::new(updates, errors),
        )
        .await
    }
}

impl MarketStream<Quote> {
    /// Connect to the quotes stream with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectFailed`] if the first dial fails.
    pub async fn quotes(
        updates: mpsc::Sender<Quote>,
        errors: mpsc::Sender<StreamError>,
    ) -> Result<Self, StreamError> {
        Self::connect(
            FeedProfile::quotes(),
            StreamConfig::default(),
            StreamSinks::new(updates, errors),
        )
        .await
    }
}

impl<U: MarketUpdate> MarketStream<U> {
    /// Connect over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectFailed`] if the first dial fails.
    /// Later failures are retried and reported through the error sink.
    pub async fn connect(
        profile: FeedProfile<U>,
        config: StreamConfig,
        sinks: StreamSinks<U>,
    ) -> Result<Self, StreamError> {
        Self::connect_with(Arc::new(WsConnector::new()), profile, config, sinks).await
    }

    /// Connect using a custom transport.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectFailed`] if the first dial fails.
    pub async fn connect_with(
        connector: Arc<dyn Connector>,
        profile: FeedProfile<U>,
        config: StreamConfig,
        sinks: StreamSinks<U>,
    ) -> Result<Self, StreamError> {
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            profile,
            config,
            codec: LemonCodec::new(),
            shared: Mutex::new(Shared::default()),
            raw_tap: Mutex::new(None),
            commands: commands_tx,
            cancel: CancellationToken::new(),
        });

        inner.transition(ConnectionState::Connecting);

        let connection = match inner.dial(connector.as_ref()).await {
            Ok(connection) => connection,
            Err(e) => {
                let error = StreamError::ConnectFailed(e.to_string());
                tracing::error!(feed = %U::KIND, error = %error, "Initial connect failed");
                metrics::record_stream_error(U::KIND, &error);
                return Err(error);
            }
        };

        let replay = inner.mark_connected(&mut commands_rx).unwrap_or_default();
        let task = tokio::spawn(Arc::clone(&inner).run(
            connector,
            connection,
            replay,
            commands_rx,
            sinks,
        ));

        Ok(Self {
            inner,
            task: Mutex::new(Some(task)),
        })
    }

    /// Feed kind this stream is specialized to.
    #[must_use]
    pub const fn feed(&self) -> FeedKind {
        U::KIND
    }

    /// Subscribe to an instrument. Duplicate subscriptions are ignored.
    ///
    /// The subscription is sent immediately when connected and replayed
    /// after every reconnect. No-op after [`disconnect`](Self::disconnect).
    pub fn subscribe(&self, isin: impl Into<InstrumentId>) {
        let isin = isin.into();
        let mut shared = self.inner.shared.lock();

        if shared.state.is_terminal() || !shared.registry.add(isin.clone()) {
            return;
        }
        metrics::set_subscriptions(U::KIND, shared.registry.len());
        tracing::debug!(feed = %U::KIND, isin = %isin, "Subscribed");

        if shared.state.is_connected() {
            let _ = self.inner.commands.send(Command::Subscribe(isin));
        }
    }

    /// Unsubscribe from an instrument. Unknown instruments are ignored.
    ///
    /// No-op after [`disconnect`](Self::disconnect).
    pub fn unsubscribe(&self, isin: &str) {
        let mut shared = self.inner.shared.lock();

        if shared.state.is_terminal() || !shared.registry.remove(isin) {
            return;
        }
        metrics::set_subscriptions(U::KIND, shared.registry.len());
        tracing::debug!(feed = %U::KIND, isin, "Unsubscribed");

        if shared.state.is_connected() {
            let _ = self
                .inner
                .commands
                .send(Command::Unsubscribe(InstrumentId::from(isin)));
        }
    }

    /// Forward every raw data payload, verbatim, into `tap`.
    ///
    /// Error markers are not forwarded. Replaces any previous tap.
    pub fn set_raw_message_tap(&self, tap: mpsc::Sender<Vec<u8>>) {
        *self.inner.raw_tap.lock() = Some(tap);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Subscribed instruments in subscription order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<InstrumentId> {
        self.inner.shared.lock().registry.snapshot()
    }

    /// Whether an instrument is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, isin: &str) -> bool {
        self.inner.shared.lock().registry.contains(isin)
    }

    /// Shut the stream down for good.
    ///
    /// Cancels pending reconnects, closes the transport and waits for the
    /// supervisor task to exit. Calling it again is a no-op. The sinks are
    /// left open; draining and dropping them is up to the caller.
    pub async fn disconnect(&self) {
        self.inner.shutdown();

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(feed = %U::KIND, error = %e, "Stream supervisor task failed");
        }
    }
}

impl<U: MarketUpdate> Drop for MarketStream<U> {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl<U: MarketUpdate> std::fmt::Debug for MarketStream<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStream")
            .field("feed", &U::KIND)
            .field("url", &self.inner.profile.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::FrameSource;

    const WAIT: Duration = Duration::from_secs(2);

    // -------------------------------------------------------------------------
    // Scripted transport
    // -------------------------------------------------------------------------

    /// Server end of one fake connection.
    struct ServerSide {
        sent: mpsc::UnboundedReceiver<String>,
        inbound: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
        closed: Arc<AtomicBool>,
    }

    impl ServerSide {
        fn push(&self, payload: &str) {
            self.inbound.send(Ok(payload.as_bytes().to_vec())).unwrap();
        }

        fn fail(&self, error: TransportError) {
            self.inbound.send(Err(error)).unwrap();
        }

        async fn next_control(&mut self) -> ControlMessage {
            let json = tokio::time::timeout(WAIT, self.sent.recv())
                .await
                .expect("timed out waiting for control message")
                .expect("client dropped connection");
            serde_json::from_str(&json).unwrap()
        }
    }

    struct FakeSink {
        sent: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSink for FakeSink {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Io("closed".into()));
            }
            self.sent
                .send(text)
                .map_err(|_| TransportError::Io("peer gone".into()))
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeSource {
        inbound: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        async fn next_payload(&mut self) -> Result<Vec<u8>, TransportError> {
            match self.inbound.recv().await {
                Some(result) => result,
                None => Err(TransportError::Closed {
                    code: Some(1006),
                    reason: "eof".into(),
                }),
            }
        }
    }

    /// Connector whose dial outcomes are scripted; dials succeed once the
    /// script runs out.
    struct ScriptedConnector {
        script: Mutex<VecDeque<bool>>,
        attempts: AtomicUsize,
        sessions: mpsc::UnboundedSender<ServerSide>,
    }

    impl ScriptedConnector {
        fn new(script: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                attempts: AtomicUsize::new(0),
                sessions: tx,
            });
            (connector, rx)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> Result<Connection, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.script.lock().pop_front().unwrap_or(true) {
                return Err(TransportError::Connect("refused".into()));
            }

            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));

            let _ = self.sessions.send(ServerSide {
                sent: sent_rx,
                inbound: inbound_tx,
                closed: Arc::clone(&closed),
            });

            Ok(Connection {
                sink: Box::new(FakeSink {
                    sent: sent_tx,
                    closed,
                }),
                source: Box::new(FakeSource {
                    inbound: inbound_rx,
                }),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn fast_config() -> StreamConfig {
        StreamConfig {
            reconnect: ReconnectConfig {
                min_delay: Duration::from_millis(10),
                step: Duration::from_millis(20),
                max_delay: Duration::from_millis(50),
                max_counter: 5,
                jitter_factor: 0.0,
            },
            connect_timeout: Duration::from_secs(1),
            send_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_millis(100),
        }
    }

    struct Harness<U: MarketUpdate> {
        stream: MarketStream<U>,
        connector: Arc<ScriptedConnector>,
        sessions: mpsc::UnboundedReceiver<ServerSide>,
        updates: mpsc::Receiver<U>,
        errors: mpsc::Receiver<StreamError>,
    }

    impl<U: MarketUpdate> Harness<U> {
        async fn next_session(&mut self) -> ServerSide {
            tokio::time::timeout(WAIT, self.sessions.recv())
                .await
                .expect("timed out waiting for connection")
                .unwrap()
        }

        async fn next_update(&mut self) -> U {
            tokio::time::timeout(WAIT, self.updates.recv())
                .await
                .expect("timed out waiting for update")
                .unwrap()
        }

        async fn next_error(&mut self) -> StreamError {
            tokio::time::timeout(WAIT, self.errors.recv())
                .await
                .expect("timed out waiting for error")
                .unwrap()
        }

        async fn wait_for_state(&self, expected: ConnectionState) {
            tokio::time::timeout(WAIT, async {
                while self.stream.state() != expected {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("timed out waiting for state");
        }
    }

    async fn connect<U: MarketUpdate>(
        profile: FeedProfile<U>,
        config: StreamConfig,
        script: &[bool],
    ) -> Harness<U> {
        let (connector, sessions) = ScriptedConnector::new(script);
        let (update_tx, updates) = mpsc::channel(16);
        let (error_tx, errors) = mpsc::channel(16);

        let stream = MarketStream::connect_with(
            connector.clone(),
            profile,
            config,
            StreamSinks::new(update_tx, error_tx),
        )
        .await
        .unwrap();

        Harness {
            stream,
            connector,
            sessions,
            updates,
            errors,
        }
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn first_connect_failure_is_returned_without_retry() {
        let (connector, _sessions) = ScriptedConnector::new(&[false]);
        let (update_tx, _updates) = mpsc::channel::<Tick>(1);
        let (error_tx, mut errors) = mpsc::channel(1);

        let result = MarketStream::connect_with(
            connector.clone(),
            FeedProfile::ticks(),
            fast_config(),
            StreamSinks::new(update_tx, error_tx),
        )
        .await;

        assert!(matches!(result, Err(StreamError::ConnectFailed(_))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_enters_connected_state() {
        let h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        assert_eq!(h.stream.state(), ConnectionState::Connected);
        assert_eq!(h.stream.feed(), FeedKind::Ticks);
        assert!(h.stream.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn duplicate_subscribe_sends_one_control_message() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let mut server = h.next_session().await;

        h.stream.subscribe("DE000TUAG000");
        h.stream.subscribe("DE000TUAG000");
        h.stream.unsubscribe("US0378331005");
        h.stream.subscribe("US88160R1014");

        let first = server.next_control().await;
        assert_eq!(
            first,
            ControlMessage::subscribe("with-quantity-with-uncovered", "DE000TUAG000".into())
        );
        // The next frame is the sentinel, so nothing was sent in between.
        let second = server.next_control().await;
        assert_eq!(second.isin.as_str(), "US88160R1014");

        assert_eq!(
            h.stream.subscriptions(),
            vec![
                InstrumentId::from("DE000TUAG000"),
                InstrumentId::from("US88160R1014")
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_sends_control_message() {
        let mut h = connect(FeedProfile::quotes(), fast_config(), &[]).await;
        let mut server = h.next_session().await;

        h.stream.subscribe("US88160R1014");
        let _ = server.next_control().await;

        h.stream.unsubscribe("US88160R1014");
        h.stream.unsubscribe("US88160R1014");

        let msg = server.next_control().await;
        assert_eq!(msg, ControlMessage::unsubscribe("US88160R1014".into()));
        assert!(!h.stream.is_subscribed("US88160R1014"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivers_decoded_updates_in_order() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let server = h.next_session().await;

        server.push(r#"{"isin":"DE000TUAG000","price":12.34,"quantity":0}"#);
        server.push(r#"{"isin":"DE000TUAG000","price":12.35,"quantity":10}"#);

        let first = h.next_update().await;
        assert_eq!(first.price, Decimal::new(1234, 2));
        assert!(!first.was_trade());

        let second = h.next_update().await;
        assert_eq!(second.price, Decimal::new(1235, 2));
        assert!(second.was_trade());

        assert!(h.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_error_markers_are_message_local() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let server = h.next_session().await;

        server.push("This instrument does not exist");
        server.push("Invalid request");
        server.push(r#"{"isin":"DE000TUAG000","price":1.0,"quantity":1}"#);

        assert_eq!(h.next_error().await, StreamError::UnknownInstrument);
        assert_eq!(h.next_error().await, StreamError::InvalidRequest);
        assert_eq!(h.next_update().await.quantity, 1);

        assert_eq!(h.stream.state(), ConnectionState::Connected);
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn decode_failure_is_reported_and_stream_continues() {
        let mut h = connect(FeedProfile::quotes(), fast_config(), &[]).await;
        let server = h.next_session().await;

        server.push(r#"{"isin":"US88160R1014","price":1.0}"#);
        server.push(
            r#"{"isin":"US88160R1014","bid_price":100.0,"ask_price":100.5,"bid_quan":50,"ask_quan":30}"#,
        );

        let error = h.next_error().await;
        assert!(matches!(error, StreamError::DecodeFailed(_)));
        assert!(error.is_message_local());

        let quote = h.next_update().await;
        assert_eq!(quote.bid_size, 50);
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn raw_tap_receives_data_payloads_only() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let server = h.next_session().await;
        let (tap_tx, mut tap_rx) = mpsc::channel(8);
        h.stream.set_raw_message_tap(tap_tx);

        let tick = r#"{"isin":"DE000TUAG000","price":12.34,"quantity":0}"#;
        server.push("This instrument does not exist");
        server.push(tick);
        server.push("garbage");

        assert_eq!(h.next_error().await, StreamError::UnknownInstrument);
        let _ = h.next_update().await;
        assert!(matches!(h.next_error().await, StreamError::DecodeFailed(_)));

        assert_eq!(tap_rx.recv().await.unwrap(), tick.as_bytes());
        assert_eq!(tap_rx.recv().await.unwrap(), b"garbage");
        assert!(tap_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replays_subscriptions_after_reconnect() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let mut server = h.next_session().await;

        h.stream.subscribe("A");
        h.stream.subscribe("B");
        let _ = server.next_control().await;
        let _ = server.next_control().await;

        server.fail(TransportError::Closed {
            code: Some(1001),
            reason: "going away".into(),
        });
        assert_eq!(h.next_error().await, StreamError::ConnectionClosed);

        let mut server = h.next_session().await;
        let first = server.next_control().await;
        let second = server.next_control().await;
        assert_eq!(first, ControlMessage::subscribe("with-quantity-with-uncovered", "A".into()));
        assert_eq!(second, ControlMessage::subscribe("with-quantity-with-uncovered", "B".into()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.sent.try_recv().is_err());

        h.wait_for_state(ConnectionState::Connected).await;
        assert_eq!(h.stream.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn subscriptions_made_while_disconnected_are_replayed_once() {
        let config = StreamConfig {
            reconnect: ReconnectConfig {
                min_delay: Duration::from_millis(200),
                ..fast_config().reconnect
            },
            ..fast_config()
        };
        let mut h = connect(FeedProfile::ticks(), config, &[]).await;
        let server = h.next_session().await;

        drop(server);
        assert_eq!(h.next_error().await, StreamError::ConnectionClosed);
        h.wait_for_state(ConnectionState::WaitingToReconnect).await;

        h.stream.subscribe("A");
        h.stream.subscribe("B");
        h.stream.unsubscribe("A");

        let mut server = h.next_session().await;
        let msg = server.next_control().await;
        assert_eq!(msg.isin.as_str(), "B");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn transport_failure_is_classified_and_reconnects() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let server = h.next_session().await;

        server.fail(TransportError::Io("connection reset by peer".into()));

        let error = h.next_error().await;
        assert_eq!(error, StreamError::Transport("connection reset by peer".into()));
        assert!(error.is_connection_fatal());

        let _server = h.next_session().await;
        h.wait_for_state(ConnectionState::Connected).await;
        assert_eq!(h.connector.attempts(), 2);
    }

    #[tokio::test]
    async fn failed_reconnects_report_connect_failed_and_keep_retrying() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[true, false, false]).await;
        let server = h.next_session().await;

        drop(server);

        assert_eq!(h.next_error().await, StreamError::ConnectionClosed);
        assert!(matches!(h.next_error().await, StreamError::ConnectFailed(_)));
        assert!(matches!(h.next_error().await, StreamError::ConnectFailed(_)));

        let _server = h.next_session().await;
        h.wait_for_state(ConnectionState::Connected).await;
        assert_eq!(h.connector.attempts(), 4);
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_silent() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let server = h.next_session().await;
        h.stream.subscribe("A");

        h.stream.disconnect().await;

        assert_eq!(h.stream.state(), ConnectionState::Disconnected);
        assert!(server.closed.load(Ordering::SeqCst));

        // A late transport failure is not reported.
        let _ = server.inbound.send(Err(TransportError::Closed {
            code: Some(1000),
            reason: String::new(),
        }));

        // The supervisor has exited and dropped its sinks without emitting.
        assert!(h.errors.recv().await.is_none());

        // Mutators are safe no-ops.
        h.stream.subscribe("B");
        h.stream.unsubscribe("A");
        assert_eq!(h.stream.subscriptions(), vec![InstrumentId::from("A")]);

        h.stream.disconnect().await;
        assert_eq!(h.stream.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_backoff() {
        let config = StreamConfig {
            reconnect: ReconnectConfig {
                min_delay: Duration::from_secs(3600),
                max_delay: Duration::from_secs(3600),
                ..fast_config().reconnect
            },
            ..fast_config()
        };
        let mut h = connect(FeedProfile::ticks(), config, &[]).await;
        drop(h.next_session().await);

        assert_eq!(h.next_error().await, StreamError::ConnectionClosed);
        h.wait_for_state(ConnectionState::WaitingToReconnect).await;

        tokio::time::timeout(WAIT, h.stream.disconnect())
            .await
            .expect("disconnect blocked on backoff");

        assert_eq!(h.stream.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn disconnect_does_not_block_on_full_sink() {
        let (connector, mut sessions) = ScriptedConnector::new(&[]);
        let (update_tx, _updates) = mpsc::channel::<Tick>(1);
        let (error_tx, _errors) = mpsc::channel(1);

        let stream = MarketStream::connect_with(
            connector,
            FeedProfile::ticks(),
            fast_config(),
            StreamSinks::new(update_tx, error_tx),
        )
        .await
        .unwrap();
        let server = sessions.recv().await.unwrap();

        for _ in 0..5 {
            server.push(r#"{"isin":"A","price":1.0,"quantity":0}"#);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(WAIT, stream.disconnect())
            .await
            .expect("disconnect blocked on a full sink");
    }

    #[tokio::test]
    async fn dropped_sink_does_not_stop_the_stream() {
        let mut h = connect(FeedProfile::ticks(), fast_config(), &[]).await;
        let mut server = h.next_session().await;
        let (tap_tx, tap_rx) = mpsc::channel(1);
        h.stream.set_raw_message_tap(tap_tx);
        drop(tap_rx);

        server.push(r#"{"isin":"A","price":1.0,"quantity":0}"#);
        let _ = h.next_update().await;

        h.stream.subscribe("B");
        assert_eq!(server.next_control().await.isin.as_str(), "B");
    }
}
