//! codex-db - SQLite read layer for the codex content index
//!
//! This crate provides read-only access to the index written by `codex-indexer`:
//! full-text search, cell lookup and statistics.

pub mod connection;
pub mod queries;

pub use connection::*;
pub use queries::*;
