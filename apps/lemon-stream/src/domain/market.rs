//! Market Data Types
//!
//! Canonical, codec-agnostic representation of the updates a stream
//! delivers. Each decoded message produces exactly one immutable value.
//!
//! - [`Tick`]: price (and optionally trade quantity) update
//! - [`Quote`]: bid/ask price-and-size update

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::InstrumentId;

// =============================================================================
// Feed Kind
// =============================================================================

/// The kind of update a stream is specialized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Price and trade updates.
    Ticks,
    /// Bid/ask updates.
    Quotes,
}

impl FeedKind {
    /// Get the feed name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticks => "ticks",
            Self::Quotes => "quotes",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tick
// =============================================================================

/// A price update for an instrument.
///
/// A quantity of `0` means the price moved because of a quote change,
/// not because a trade happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument the update belongs to.
    pub isin: InstrumentId,
    /// Current market price.
    pub price: Decimal,
    /// Traded quantity, `0` for a price-only update.
    pub quantity: u64,
}

impl Tick {
    /// Whether this tick reports an actual trade.
    #[must_use]
    pub const fn was_trade(&self) -> bool {
        self.quantity > 0
    }
}

// =============================================================================
// Quote
// =============================================================================

/// A bid/ask update for an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument the update belongs to.
    pub isin: InstrumentId,
    /// Current bid price.
    pub bid: Decimal,
    /// Current ask price.
    pub ask: Decimal,
    /// Current bid size.
    pub bid_size: u64,
    /// Current ask size.
    pub ask_size: u64,
}

impl Quote {
    /// Ask minus bid.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Midpoint between bid and ask.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

// =============================================================================
// Data Update
// =============================================================================

/// Tagged union over every update kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataUpdate {
    /// A tick update.
    Tick(Tick),
    /// A quote update.
    Quote(Quote),
}

impl DataUpdate {
    /// Instrument the update belongs to.
    #[must_use]
    pub const fn instrument(&self) -> &InstrumentId {
        match self {
            Self::Tick(tick) => &tick.isin,
            Self::Quote(quote) => &quote.isin,
        }
    }

    /// Feed kind this update was produced by.
    #[must_use]
    pub const fn kind(&self) -> FeedKind {
        match self {
            Self::Tick(_) => FeedKind::Ticks,
            Self::Quote(_) => FeedKind::Quotes,
        }
    }
}

impl From<Tick> for DataUpdate {
    fn from(tick: Tick) -> Self {
        Self::Tick(tick)
    }
}

impl From<Quote> for DataUpdate {
    fn from(quote: Quote) -> Self {
        Self::Quote(quote)
    }
}

/// An update type a stream can be specialized to.
///
/// Implemented by [`Tick`] and [`Quote`]; the stream supervisor is generic
/// over this trait so the decode path is fixed at construction.
pub trait MarketUpdate: fmt::Debug + Clone + Send + Sync + 'static {
    /// Feed kind carrying this update type.
    const KIND: FeedKind;

    /// Instrument the update belongs to.
    fn instrument(&self) -> &InstrumentId;
}

impl MarketUpdate for Tick {
    const KIND: FeedKind = FeedKind::Ticks;

    fn instrument(&self) -> &InstrumentId {
        &self.isin
    }
}

impl MarketUpdate for Quote {
    const KIND: FeedKind = FeedKind::Quotes;

    fn instrument(&self) -> &InstrumentId {
        &self.isin
    }
}
