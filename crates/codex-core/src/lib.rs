//! codex-core - Core types for the codex content index
//!
//! Data-model enums, provider-facing cell types, content hashing, text
//! tokenization and configuration. No database access lives here.

pub mod config;
pub mod errors;
pub mod hash;
pub mod text;
pub mod types;

pub use config::IndexConfig;
pub use errors::*;
pub use hash::{content_hash, text_hash};
pub use types::*;

/// Schema version this build reads and writes
pub const SCHEMA_VERSION: i32 = 1;
