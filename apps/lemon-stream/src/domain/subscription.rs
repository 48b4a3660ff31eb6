//! Subscription Registry
//!
//! The set of instruments the caller currently wants streamed.
//!
//! # Design
//!
//! The registry reflects caller intent only. It is never cleared by a
//! disconnect, and it is replayed as subscribe control messages every
//! time a connection is (re)established. Membership is kept in insertion
//! order so a replay is deterministic.
//!
//! The registry itself holds no lock; the stream supervisor guards it
//! together with the connection state so "is connected" and "what is
//! subscribed" are always read consistently.

use indexmap::IndexSet;

use super::instrument::InstrumentId;

/// Insertion-ordered set of subscribed instruments.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    instruments: IndexSet<InstrumentId>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instrument.
    ///
    /// Returns `true` if it was not yet a member. Duplicate adds are no-ops.
    pub fn add(&mut self, id: InstrumentId) -> bool {
        self.instruments.insert(id)
    }

    /// Remove an instrument.
    ///
    /// Returns `true` if it was a member. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        self.instruments.shift_remove(id)
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.instruments.contains(id)
    }

    /// Current members in insertion order, for replay.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InstrumentId> {
        self.instruments.iter().cloned().collect()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Iterate over members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &InstrumentId> {
        self.instruments.iter()
    }
}

impl FromIterator<InstrumentId> for SubscriptionRegistry {
    fn from_iter<T: IntoIterator<Item = InstrumentId>>(iter: T) -> Self {
        Self {
            instruments: iter.into_iter().collect(),
        }
    }
}
