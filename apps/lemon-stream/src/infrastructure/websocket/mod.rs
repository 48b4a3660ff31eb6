//! WebSocket Transport
//!
//! [`Connector`] implementation over `tokio-tungstenite`. Text and binary
//! frames are surfaced as payloads; ping/pong is answered by tungstenite
//! and never reaches the stream.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::application::ports::{Connection, Connector, FrameSink, FrameSource, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer vanished without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported after a completed close handshake.
const NORMAL_CLOSURE: u16 = 1000;

/// Dials `ws://` and `wss://` endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        Ok(Connection {
            sink: Box::new(WsSink { write }),
            source: Box::new(WsSource { read }),
        })
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.write.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_payload(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                    });
                    tracing::debug!(?code, reason, "Server sent close frame");
                    return Err(TransportError::Closed { code, reason });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => {
                    return Err(TransportError::Closed {
                        code: Some(ABNORMAL_CLOSURE),
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }
}

fn map_ws_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed => TransportError::Closed {
            code: Some(NORMAL_CLOSURE),
            reason: "connection closed".to_string(),
        },
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => TransportError::Closed {
            code: Some(ABNORMAL_CLOSURE),
            reason: "reset without closing handshake".to_string(),
        },
        other => TransportError::Io(other.to_string()),
    }
}
