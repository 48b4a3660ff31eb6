//! Instrument Identifiers
//!
//! Instruments are identified by an opaque string, in practice an ISIN
//! (International Securities Identification Number). Identifiers are
//! compared by exact value and never normalized.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a tradable instrument (e.g. `DE000TUAG000`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Wrap an identifier as-is.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstrumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for InstrumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for InstrumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_exact() {
        assert_eq!(InstrumentId::from("DE000TUAG000"), InstrumentId::new("DE000TUAG000"));
        assert_ne!(InstrumentId::from("DE000TUAG000"), InstrumentId::from("de000tuag000"));
        assert_ne!(InstrumentId::from("DE000TUAG000"), InstrumentId::from(" DE000TUAG000"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = InstrumentId::from("US88160R1014");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""US88160R1014""#);

        let back: InstrumentId = serde_json::from_str(r#""US88160R1014""#).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_matches_inner() {
        assert_eq!(InstrumentId::from("US0378331005").to_string(), "US0378331005");
    }
}
