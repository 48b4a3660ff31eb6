//! Connection States
//!
//! Lifecycle of the single transport connection behind one stream.
//!
//! ```text
//! Initializing ─► Connecting ─► Connected ─► WaitingToReconnect ─► Connecting ─► …
//!                     │                              │
//!                     └──────────► Disconnected ◄────┘   (explicit disconnect only)
//! ```
//!
//! `Disconnected` is terminal: no transition leaves it.

use std::fmt;

/// Connection state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Constructed, no dial attempted yet.
    #[default]
    Initializing,
    /// Dial in progress.
    Connecting,
    /// Connected and listening.
    Connected,
    /// Waiting for the backoff delay before the next dial.
    WaitingToReconnect,
    /// Shut down by the caller. Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Whether control messages can be sent right now.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::WaitingToReconnect => "waiting_to_reconnect",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Disconnected, _) => false,
            (_, Self::Disconnected)
            | (Self::Initializing | Self::WaitingToReconnect, Self::Connecting)
            | (Self::Connecting, Self::Connected | Self::WaitingToReconnect)
            | (Self::Connected, Self::WaitingToReconnect) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
