//! Port Interfaces
//!
//! Defines the transport contract following the Hexagonal Architecture
//! pattern. The transport is a black-box duplex channel that can fail at
//! any time; the supervisor only needs to dial it, write text frames,
//! read payloads and close it.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: dials a connection to a stream endpoint
//! - `FrameSink`: write half of a live connection
//! - `FrameSource`: read half of a live connection

use async_trait::async_trait;

/// WebSocket close codes treated as a graceful remote close.
pub const GRACEFUL_CLOSE_CODES: [u16; 3] = [
    1000, // normal closure
    1001, // going away
    1006, // abnormal closure (no close frame)
];

/// Errors surfaced by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Dialing the endpoint failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection was closed, with the close code if one was received.
    #[error("connection closed (code {code:?}): {reason}")]
    Closed {
        /// WebSocket close code.
        code: Option<u16>,
        /// Close reason as sent by the peer.
        reason: String,
    },

    /// A write did not complete in time.
    #[error("send timed out")]
    SendTimeout,

    /// Any other I/O or protocol failure.
    #[error("{0}")]
    Io(String),
}

impl TransportError {
    /// Whether the failure is a graceful close by the remote side.
    #[must_use]
    pub fn is_graceful_close(&self) -> bool {
        matches!(
            self,
            Self::Closed { code: Some(code), .. } if GRACEFUL_CLOSE_CODES.contains(code)
        )
    }
}

/// A freshly dialed connection, split into its two halves.
pub struct Connection {
    /// Write half.
    pub sink: Box<dyn FrameSink>,
    /// Read half.
    pub source: Box<dyn FrameSource>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Dials connections to a stream endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

/// Write half of a live connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Closing an already closed connection succeeds.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a live connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Wait for the next data payload.
    ///
    /// Control frames are handled by the adapter and never returned.
    /// Must be cancel-safe: dropping the future loses no payload.
    async fn next_payload(&mut self) -> Result<Vec<u8>, TransportError>;
}
