//! CLI command implementations

pub mod doctor;
pub mod index;
pub mod search;
pub mod stats;
pub mod validate;
