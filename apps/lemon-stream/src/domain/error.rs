//! Stream Error Taxonomy
//!
//! Every error a stream reports travels through the caller's error sink.
//! The variant alone tells a consumer whether the connection is gone
//! (expect a gap while the stream reconnects) or whether a single message
//! was affected (keep consuming).

/// Errors reported by a market data stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Dialing the remote service failed.
    #[error("can't connect to lemon.markets: {0}")]
    ConnectFailed(String),

    /// An established connection was closed by the remote side.
    #[error("lemon.markets connection closed")]
    ConnectionClosed,

    /// The provider rejected a subscription for an unknown instrument.
    #[error("unknown instrument")]
    UnknownInstrument,

    /// The provider rejected a request as malformed.
    #[error("invalid request detected")]
    InvalidRequest,

    /// A data message could not be decoded.
    #[error("failed to decode update: {0}")]
    DecodeFailed(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Whether the error ended the current connection.
    ///
    /// Connection-fatal errors are followed by a reconnect attempt.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::ConnectionClosed | Self::Transport(_)
        )
    }

    /// Whether the error only affected a single message.
    #[must_use]
    pub const fn is_message_local(&self) -> bool {
        !self.is_connection_fatal()
    }

    /// Short stable name, used for log fields and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::ConnectionClosed => "connection_closed",
            Self::UnknownInstrument => "unknown_instrument",
            Self::InvalidRequest => "invalid_request",
            Self::DecodeFailed(_) => "decode_failed",
            Self::Transport(_) => "transport",
        }
    }
}
