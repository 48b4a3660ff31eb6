//! Stream Codec Module
//!
//! Classification and decoding for lemon.markets payloads.
//!
//! Decoding is a two step affair:
//!
//! 1. [`LemonCodec::classify`] looks for the provider's plain-text error
//!    phrases. The server reports rejected requests as free text rather
//!    than a structured envelope, so the marker strings below are the only
//!    thing a provider wording change touches.
//! 2. Anything that is not an error marker is decoded as the stream's
//!    update type ([`LemonCodec::decode_tick`], [`LemonCodec::decode_quote`]).
//!
//! The codec is stateless and never blocks.

use crate::domain::error::StreamError;
use crate::domain::market::{DataUpdate, FeedKind, Quote, Tick};

use super::messages::{ControlMessage, QuoteMessage, TickMessage};

/// Phrase the server uses when a subscription names an unknown instrument.
pub const UNKNOWN_INSTRUMENT_MARKER: &str = "This instrument does not exist";

/// Phrase the server uses when a request is malformed.
pub const INVALID_REQUEST_MARKER: &str = "Invalid request";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Server-side error reported in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Subscription for an instrument the provider does not know.
    UnknownInstrument,
    /// Request the provider could not parse.
    InvalidRequest,
}

impl From<ServerErrorKind> for StreamError {
    fn from(kind: ServerErrorKind) -> Self {
        match kind {
            ServerErrorKind::UnknownInstrument => Self::UnknownInstrument,
            ServerErrorKind::InvalidRequest => Self::InvalidRequest,
        }
    }
}

/// Result of classifying a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The payload is a server error marker.
    ServerError(ServerErrorKind),
    /// The payload should be decoded as an update.
    Data,
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    let needle = needle.as_bytes();
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// JSON codec for lemon.markets streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct LemonCodec;

impl LemonCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify a raw payload as server error or data.
    ///
    /// The unknown-instrument marker takes precedence over the
    /// invalid-request marker.
    #[must_use]
    pub fn classify(&self, payload: &[u8]) -> Classification {
        if contains(payload, UNKNOWN_INSTRUMENT_MARKER) {
            Classification::ServerError(ServerErrorKind::UnknownInstrument)
        } else if contains(payload, INVALID_REQUEST_MARKER) {
            Classification::ServerError(ServerErrorKind::InvalidRequest)
        } else {
            Classification::Data
        }
    }

    /// Decode a tick payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a well-formed tick.
    pub fn decode_tick(&self, payload: &[u8]) -> Result<Tick, CodecError> {
        let msg: TickMessage = serde_json::from_slice(payload)?;
        Ok(msg.into())
    }

    /// Decode a quote payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a well-formed quote.
    pub fn decode_quote(&self, payload: &[u8]) -> Result<Quote, CodecError> {
        let msg: QuoteMessage = serde_json::from_slice(payload)?;
        Ok(msg.into())
    }

    /// Decode a payload as the given feed's update type.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the feed's schema.
    pub fn decode(&self, payload: &[u8], kind: FeedKind) -> Result<DataUpdate, CodecError> {
        match kind {
            FeedKind::Ticks => self.decode_tick(payload).map(DataUpdate::Tick),
            FeedKind::Quotes => self.decode_quote(payload).map(DataUpdate::Quote),
        }
    }

    /// Encode a control message to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_control(&self, msg: &ControlMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(msg)?)
    }
}
