//! lemon.markets WebSocket Message Types
//!
//! Wire format types for the lemon.markets streaming API. These map
//! directly to the provider's JSON schema and are converted into the
//! domain types from [`crate::domain::market`].
//!
//! # Control Messages (client → server)
//!
//! ```json
//! {"action": "subscribe", "specifier": "with-quantity-with-uncovered", "value": "DE000TUAG000"}
//! {"action": "unsubscribe", "specifier": "", "value": "DE000TUAG000"}
//! ```
//!
//! # Data Messages (server → client)
//!
//! ```json
//! {"isin": "DE000TUAG000", "price": 12.34, "quantity": 0}
//! {"isin": "US88160R1014", "bid_price": 100.0, "ask_price": 100.5, "bid_quan": 50, "ask_quan": 30}
//! ```
//!
//! Errors are not structured: the server answers with plain text, which
//! the codec matches against known phrases.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::instrument::InstrumentId;
use crate::domain::market::{Quote, Tick};

// =============================================================================
// Control Messages
// =============================================================================

/// Control action sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Start streaming an instrument.
    Subscribe,
    /// Stop streaming an instrument.
    Unsubscribe,
}

impl Action {
    /// Get the action name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Subscribe/unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Requested action.
    pub action: Action,

    /// Feed variant selector, empty for unsubscribe.
    pub specifier: String,

    /// Instrument identifier.
    #[serde(rename = "value")]
    pub isin: InstrumentId,
}

impl ControlMessage {
    /// Create a subscribe request with the feed's specifier.
    #[must_use]
    pub fn subscribe(specifier: &str, isin: InstrumentId) -> Self {
        Self {
            action: Action::Subscribe,
            specifier: specifier.to_string(),
            isin,
        }
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub const fn unsubscribe(isin: InstrumentId) -> Self {
        Self {
            action: Action::Unsubscribe,
            specifier: String::new(),
            isin,
        }
    }
}

// =============================================================================
// Data Messages
// =============================================================================

/// Tick update as sent by the ticks stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickMessage {
    /// Instrument ISIN.
    pub isin: String,

    /// Current market price.
    pub price: Decimal,

    /// Trade quantity, `0` for a price-only update.
    #[serde(default)]
    pub quantity: u64,
}

impl From<TickMessage> for Tick {
    fn from(msg: TickMessage) -> Self {
        Self {
            isin: InstrumentId::from(msg.isin),
            price: msg.price,
            quantity: msg.quantity,
        }
    }
}

/// Quote update as sent by the quotes stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteMessage {
    /// Instrument ISIN.
    pub isin: String,

    /// Current bid price.
    pub bid_price: Decimal,

    /// Current ask price.
    pub ask_price: Decimal,

    /// Current bid size.
    #[serde(default, rename = "bid_quan")]
    pub bid_size: u64,

    /// Current ask size.
    #[serde(default, rename = "ask_quan")]
    pub ask_size: u64,
}

impl From<QuoteMessage> for Quote {
    fn from(msg: QuoteMessage) -> Self {
        Self {
            isin: InstrumentId::from(msg.isin),
            bid: msg.bid_price,
            ask: msg.ask_price,
            bid_size: msg.bid_size,
            ask_size: msg.ask_size,
        }
    }
}
