//! Application Layer - Port definitions.
//!
//! Interfaces the stream supervisor drives. Infrastructure adapters
//! implement them; tests substitute scripted in-memory versions.

/// Port interfaces for external systems (the duplex transport).
pub mod ports;
