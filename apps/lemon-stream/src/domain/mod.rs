//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for market data streaming.
//! Nothing here performs I/O; everything is plain data plus the rules
//! that govern it.

/// Trading-hours helper for the Lang & Schwarz venue.
pub mod calendar;

/// Connection lifecycle states.
pub mod connection;

/// Stream error taxonomy.
pub mod error;

/// Instrument identifiers.
pub mod instrument;

/// Market data types (ticks and quotes).
pub mod market;

/// Subscription registry that survives reconnects.
pub mod subscription;
