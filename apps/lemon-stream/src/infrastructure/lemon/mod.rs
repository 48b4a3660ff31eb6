//! lemon.markets Stream Adapters
//!
//! Client for the two lemon.markets market data streams:
//!
//! - **Ticks**: last price, plus quantity when the update was a trade
//! - **Quotes**: best bid/ask with sizes
//!
//! Both speak the same JSON control protocol and report rejected requests
//! as plain-text error phrases.

pub mod codec;
pub mod feed;
pub mod messages;
pub mod reconnect;
pub mod stream;

pub use codec::{
    Classification, CodecError, INVALID_REQUEST_MARKER, LemonCodec, ServerErrorKind,
    UNKNOWN_INSTRUMENT_MARKER,
};
pub use feed::{DecodeFn, FeedProfile, QUOTES_SPECIFIER, QUOTES_URL, TICKS_SPECIFIER, TICKS_URL};
pub use messages::{Action, ControlMessage, QuoteMessage, TickMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use stream::{MarketStream, QuoteStream, StreamConfig, StreamSinks, TickStream};
