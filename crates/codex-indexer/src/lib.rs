//! codex-indexer - Indexing pipeline for the codex content index
//!
//! This crate owns all **write** operations to the index SQLite database:
//! schema lifecycle, file and cell upserts, full-text search maintenance,
//! incremental sync and the background validator.
//! The companion `codex-db` crate provides read-only access for search paths.
//! Both share the same `<project>/.project/indexes.sqlite` file.

pub mod connection;
pub mod discovery;
pub mod fts;
pub mod provider;
pub mod rebuild;
pub mod resilience;
pub mod schema;
pub mod store;
pub mod sync;
pub mod validator;

pub use connection::{default_db_path, IndexDb, IndexError, SharedDb};
pub use discovery::{find_notebook_files, find_notebook_files_in};
pub use fts::{FtsParity, FtsRepair};
pub use provider::{parse_notebook, DirectoryProvider, FileProvider};
pub use rebuild::{nuke_and_recreate, rebuild_index};
pub use resilience::{with_lock_retry, CheckpointMode, CheckpointResult, RetryPolicy};
pub use schema::{init_schema, ProjectIdentity, SchemaInfo, SchemaStatus, SCHEMA_VERSION};
pub use store::{CellChange, CellWrite, FileRecord, SyncMetadata};
pub use sync::{
    check_files_for_sync, check_sync_status, check_sync_status_on, sync_files, sync_paths,
    SyncCheck, SyncOptions, SyncProgress, SyncReason, SyncReport,
};
pub use validator::{
    BackgroundValidator, Escalation, IssueKind, LoggingObserver, Severity, ValidationIssue,
    ValidationObserver, ValidationReport, ValidationStatus, ValidationTier, ValidatorDeps,
};
