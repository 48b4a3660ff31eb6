//! Stream Lifecycle Integration Tests
//!
//! Drives real `MarketStream`s against an in-process WebSocket server:
//! subscribe, deliver, server errors, reconnect with replay, disconnect.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use lemon_stream::infrastructure::lemon::ReconnectConfig;
use lemon_stream::{
    ConnectionState, FeedProfile, MarketStream, MarketUpdate, Quote, QuoteStream, StreamConfig,
    StreamError, StreamSinks, Tick, TickStream,
};

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

/// Accepts WebSocket clients and hands each connection to the test.
struct MockServer {
    url: String,
    sessions: mpsc::UnboundedReceiver<ServerSocket>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, sessions) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await
                    && tx.send(ws).is_err()
                {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            sessions,
            _handle: handle,
        }
    }

    async fn next_session(&mut self) -> ServerSocket {
        timeout(WAIT, self.sessions.recv())
            .await
            .expect("timed out waiting for client")
            .unwrap()
    }
}

/// Next text frame from the client, parsed as JSON.
async fn next_control(ws: &mut ServerSocket) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for control message")
            .expect("client closed the connection")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn push(ws: &mut ServerSocket, payload: &str) {
    ws.send(Message::Text(payload.into())).await.unwrap();
}

fn test_config() -> StreamConfig {
    StreamConfig {
        reconnect: ReconnectConfig {
            min_delay: Duration::from_millis(20),
            step: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_counter: 5,
            jitter_factor: 0.0,
        },
        connect_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
    }
}

struct Client<U: MarketUpdate> {
    stream: MarketStream<U>,
    updates: mpsc::Receiver<U>,
    errors: mpsc::Receiver<StreamError>,
}

async fn connect<U: MarketUpdate>(profile: FeedProfile<U>) -> Client<U> {
    let (update_tx, updates) = mpsc::channel(64);
    let (error_tx, errors) = mpsc::channel(64);
    let stream = MarketStream::connect(profile, test_config(), StreamSinks::new(update_tx, error_tx))
        .await
        .unwrap();

    Client {
        stream,
        updates,
        errors,
    }
}

async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

#[tokio::test]
async fn quote_end_to_end() {
    let mut server = MockServer::start().await;
    let mut client = connect(FeedProfile::quotes().with_url(&server.url)).await;
    let mut ws = server.next_session().await;

    assert_eq!(client.stream.state(), ConnectionState::Connected);

    client.stream.subscribe("US88160R1014");
    assert_eq!(
        next_control(&mut ws).await,
        json!({
            "action": "subscribe",
            "specifier": "with-quantity-with-price",
            "value": "US88160R1014"
        })
    );

    push(
        &mut ws,
        r#"{"isin":"US88160R1014","bid_price":100.0,"ask_price":100.5,"bid_quan":50,"ask_quan":30}"#,
    )
    .await;

    let quote: Quote = recv(&mut client.updates).await;
    assert_eq!(quote.isin.as_str(), "US88160R1014");
    assert_eq!(quote.bid, Decimal::new(1000, 1));
    assert_eq!(quote.ask, Decimal::new(1005, 1));
    assert_eq!(quote.bid_size, 50);
    assert_eq!(quote.ask_size, 30);
    assert_eq!(quote.spread(), Decimal::new(5, 1));

    client.stream.disconnect().await;
    assert_eq!(client.stream.state(), ConnectionState::Disconnected);

    // The supervisor exits without reporting anything.
    assert!(client.errors.recv().await.is_none());
}

#[tokio::test]
async fn tick_subscribe_and_unsubscribe() {
    let mut server = MockServer::start().await;
    let client = connect(FeedProfile::ticks().with_url(&server.url)).await;
    let mut ws = server.next_session().await;

    client.stream.subscribe("DE000TUAG000");
    client.stream.subscribe("DE000TUAG000");
    client.stream.unsubscribe("DE000TUAG000");

    assert_eq!(
        next_control(&mut ws).await,
        json!({
            "action": "subscribe",
            "specifier": "with-quantity-with-uncovered",
            "value": "DE000TUAG000"
        })
    );
    assert_eq!(
        next_control(&mut ws).await,
        json!({"action": "unsubscribe", "specifier": "", "value": "DE000TUAG000"})
    );
    assert!(client.stream.subscriptions().is_empty());
}

#[tokio::test]
async fn server_errors_do_not_interrupt_the_stream() {
    let mut server = MockServer::start().await;
    let mut client = connect(FeedProfile::ticks().with_url(&server.url)).await;
    let mut ws = server.next_session().await;

    client.stream.subscribe("XX0000000000");
    let _ = next_control(&mut ws).await;

    push(&mut ws, "This instrument does not exist").await;
    push(&mut ws, "Invalid request").await;
    push(&mut ws, r#"{"isin":"DE000TUAG000","price":12.34,"quantity":0}"#).await;

    assert_eq!(recv(&mut client.errors).await, StreamError::UnknownInstrument);
    assert_eq!(recv(&mut client.errors).await, StreamError::InvalidRequest);

    let tick: Tick = recv(&mut client.updates).await;
    assert_eq!(tick.price, Decimal::new(1234, 2));
    assert!(!tick.was_trade());

    // Still the same connection.
    assert_eq!(client.stream.state(), ConnectionState::Connected);
    assert!(timeout(Duration::from_millis(100), server.sessions.recv()).await.is_err());
}

#[tokio::test]
async fn reconnect_replays_subscriptions_in_order() {
    let mut server = MockServer::start().await;
    let mut client = connect(FeedProfile::ticks().with_url(&server.url)).await;
    let mut ws = server.next_session().await;

    client.stream.subscribe("DE000TUAG000");
    client.stream.subscribe("US88160R1014");
    let _ = next_control(&mut ws).await;
    let _ = next_control(&mut ws).await;

    ws.close(Some(CloseFrame {
        code: CloseCode::Away,
        reason: "restart".into(),
    }))
    .await
    .unwrap();
    drop(ws);

    assert_eq!(recv(&mut client.errors).await, StreamError::ConnectionClosed);

    let mut ws = server.next_session().await;
    let first = next_control(&mut ws).await;
    let second = next_control(&mut ws).await;
    assert_eq!(first["action"], "subscribe");
    assert_eq!(first["value"], "DE000TUAG000");
    assert_eq!(second["action"], "subscribe");
    assert_eq!(second["value"], "US88160R1014");

    push(&mut ws, r#"{"isin":"US88160R1014","price":250.5,"quantity":3}"#).await;
    let tick = recv(&mut client.updates).await;
    assert_eq!(tick.isin.as_str(), "US88160R1014");
    assert!(tick.was_trade());

    assert_eq!(client.stream.state(), ConnectionState::Connected);
    client.stream.disconnect().await;
}

#[tokio::test]
async fn abrupt_drop_is_reported_and_recovered() {
    let mut server = MockServer::start().await;
    let mut client = connect(FeedProfile::quotes().with_url(&server.url)).await;

    drop(server.next_session().await);

    assert!(recv(&mut client.errors).await.is_connection_fatal());
    let _ws = server.next_session().await;

    timeout(WAIT, async {
        while client.stream.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream did not reconnect");
}

#[tokio::test]
async fn first_connect_failure_is_returned() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tick_tx, _ticks) = mpsc::channel(1);
    let (error_tx, _errors) = mpsc::channel(1);
    let result = TickStream::connect(
        FeedProfile::ticks().with_url(format!("ws://{addr}")),
        test_config(),
        StreamSinks::new(tick_tx, error_tx),
    )
    .await;

    assert!(matches!(result, Err(StreamError::ConnectFailed(_))));
}

#[tokio::test]
async fn disconnect_during_backoff_stops_reconnecting() {
    let mut server = MockServer::start().await;
    let (quote_tx, _quotes) = mpsc::channel(1);
    let (error_tx, mut errors) = mpsc::channel(8);

    let config = StreamConfig {
        reconnect: ReconnectConfig {
            min_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..test_config().reconnect
        },
        ..test_config()
    };
    let stream = QuoteStream::connect(
        FeedProfile::quotes().with_url(&server.url),
        config,
        StreamSinks::new(quote_tx, error_tx),
    )
    .await
    .unwrap();

    drop(server.next_session().await);
    assert!(recv(&mut errors).await.is_connection_fatal());

    timeout(WAIT, stream.disconnect())
        .await
        .expect("disconnect waited for the backoff delay");
    assert_eq!(stream.state(), ConnectionState::Disconnected);
    assert!(errors.recv().await.is_none());
}
