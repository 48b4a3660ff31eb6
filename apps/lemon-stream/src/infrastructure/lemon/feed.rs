//! Feed Profiles
//!
//! A stream is specialized once, at construction, to exactly one update
//! kind on exactly one endpoint. A [`FeedProfile`] bundles what differs
//! between the ticks and quotes feeds: endpoint URL, subscribe specifier
//! and decode function.
//!
//! # Stream URLs
//!
//! - Ticks: `wss://api.lemon.markets/streams/v1/marketdata`
//! - Quotes: `wss://api.lemon.markets/streams/v1/quotes`

use crate::domain::instrument::InstrumentId;
use crate::domain::market::{MarketUpdate, Quote, Tick};

use super::codec::{CodecError, LemonCodec};
use super::messages::ControlMessage;

/// Default ticks stream endpoint.
pub const TICKS_URL: &str = "wss://api.lemon.markets/streams/v1/marketdata";

/// Default quotes stream endpoint.
pub const QUOTES_URL: &str = "wss://api.lemon.markets/streams/v1/quotes";

/// Ticks specifier: include trade quantity and uncovered price updates.
pub const TICKS_SPECIFIER: &str = "with-quantity-with-uncovered";

/// Quotes specifier: include sizes and prices.
pub const QUOTES_SPECIFIER: &str = "with-quantity-with-price";

/// Decode function for one update type.
pub type DecodeFn<U> = fn(&LemonCodec, &[u8]) -> Result<U, CodecError>;

/// Per-feed configuration record.
#[derive(Debug, Clone)]
pub struct FeedProfile<U: MarketUpdate> {
    /// WebSocket endpoint.
    pub url: String,
    /// Feed variant selector sent with every subscribe.
    pub specifier: &'static str,
    /// Payload decoder.
    pub decode: DecodeFn<U>,
}

impl FeedProfile<Tick> {
    /// Profile for the ticks stream.
    #[must_use]
    pub fn ticks() -> Self {
        Self {
            url: TICKS_URL.to_string(),
            specifier: TICKS_SPECIFIER,
            decode: LemonCodec::decode_tick,
        }
    }
}

impl FeedProfile<Quote> {
    /// Profile for the quotes stream.
    #[must_use]
    pub fn quotes() -> Self {
        Self {
            url: QUOTES_URL.to_string(),
            specifier: QUOTES_SPECIFIER,
            decode: LemonCodec::decode_quote,
        }
    }
}

impl<U: MarketUpdate> FeedProfile<U> {
    /// Override the endpoint URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Subscribe request for an instrument on this feed.
    #[must_use]
    pub fn subscribe_message(&self, isin: InstrumentId) -> ControlMessage {
        ControlMessage::subscribe(self.specifier, isin)
    }

    /// Unsubscribe request for an instrument on this feed.
    #[must_use]
    pub const fn unsubscribe_message(&self, isin: InstrumentId) -> ControlMessage {
        ControlMessage::unsubscribe(isin)
    }
}
