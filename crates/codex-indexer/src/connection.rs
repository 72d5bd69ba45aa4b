//! Read-write database connection for indexing operations

use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use codex_core::IndexConfig;

use crate::rebuild;
use crate::resilience::{self, CheckpointMode, CheckpointResult, RetryPolicy};
use crate::schema::{self, ProjectIdentity, SchemaStatus};

/// Indexer database errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory scan error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Index store is closed")]
    Closed,

    #[error("File type of {path} is {stored}, refusing to change it to {requested}")]
    FileTypeChanged {
        path: String,
        stored: String,
        requested: String,
    },

    #[error("Invalid file {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    #[error("File provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexError {
    /// True for lock contention that may succeed on retry
    pub fn is_locked(&self) -> bool {
        match self {
            IndexError::Sqlite(rusqlite::Error::SqliteFailure(err, msg)) => {
                matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
                    || msg.as_deref().map(is_lock_message).unwrap_or(false)
            }
            IndexError::Sqlite(other) => is_lock_message(&other.to_string()),
            _ => false,
        }
    }
}

fn is_lock_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("database is busy")
        || lower.contains("sqlite_busy")
}

/// Store handle shared between foreground sync and the background validator
pub type SharedDb = Arc<Mutex<IndexDb>>;

/// Default database location inside a project directory
pub fn default_db_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".project").join("indexes.sqlite")
}

/// Read-write database connection for indexing
pub struct IndexDb {
    conn: Option<Connection>,
    path: PathBuf,
    config: IndexConfig,
    identity: Option<ProjectIdentity>,
    retry: RetryPolicy,
    rebuilt_on_open: bool,
}

impl IndexDb {
    /// Open or create the database at a specific path.
    ///
    /// A store written by another schema version or another project is
    /// dropped and recreated; [`IndexDb::rebuilt_on_open`] then reports true
    /// and the caller should run a forced full sync.
    pub fn open_or_create(
        path: &Path,
        config: &IndexConfig,
        identity: Option<ProjectIdentity>,
    ) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Self::from_connection(conn, path.to_path_buf(), config, identity)
    }

    /// In-memory store (tests, dry runs)
    pub fn open_in_memory(config: &IndexConfig) -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, PathBuf::from(":memory:"), config, None)
    }

    fn from_connection(
        conn: Connection,
        path: PathBuf,
        config: &IndexConfig,
        identity: Option<ProjectIdentity>,
    ) -> Result<Self, IndexError> {
        configure(&conn, config)?;

        let status = schema::inspect_schema(&conn, identity.as_ref())?;
        let mut rebuilt_on_open = false;
        match &status {
            SchemaStatus::Missing => {
                schema::init_schema(&conn, identity.as_ref())?;
            }
            SchemaStatus::Current => {
                schema::apply_schema(&conn)?;
                adopt_identity(&conn, identity.as_ref())?;
            }
            other => {
                warn!(status = ?other, path = %path.display(), "Index schema invalid, recreating");
                rebuild::nuke_and_recreate(&conn, identity.as_ref())?;
                rebuilt_on_open = true;
            }
        }

        debug!(path = %path.display(), "Opened index store");

        Ok(Self {
            conn: Some(conn),
            path,
            config: config.clone(),
            identity,
            retry: RetryPolicy::from_config(config),
            rebuilt_on_open,
        })
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<&ProjectIdentity> {
        self.identity.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// True if the store was recreated while opening and needs a full sync
    pub fn rebuilt_on_open(&self) -> bool {
        self.rebuilt_on_open
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> Result<&Connection, IndexError> {
        self.conn.as_ref().ok_or(IndexError::Closed)
    }

    /// Get a mutable reference to the underlying connection
    pub fn connection_mut(&mut self) -> Result<&mut Connection, IndexError> {
        self.conn.as_mut().ok_or(IndexError::Closed)
    }

    /// Execute a closure within a transaction.
    ///
    /// Commits on success; rolls back and returns the closure's error otherwise.
    pub fn transaction<F, T>(&mut self, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&Connection) -> Result<T, IndexError>,
    {
        let conn = self.connection_mut()?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// [`IndexDb::transaction`] retried on lock contention
    pub fn write<F, T>(&mut self, context: &str, mut f: F) -> Result<T, IndexError>
    where
        F: FnMut(&Connection) -> Result<T, IndexError>,
    {
        let policy = self.retry;
        resilience::with_lock_retry(&policy, context, || self.transaction(|conn| f(conn)))
    }

    /// Run a WAL checkpoint in the given mode
    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointResult, IndexError> {
        resilience::checkpoint(self.connection()?, mode)
    }

    /// Flush and truncate the WAL, then close. Later operations fail with
    /// [`IndexError::Closed`]. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), IndexError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        match resilience::checkpoint(&conn, CheckpointMode::Truncate) {
            Ok(result) if result.busy => {
                warn!(path = %self.path.display(), "WAL checkpoint incomplete at close (busy)");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "WAL checkpoint failed at close"),
        }

        conn.close().map_err(|(_, e)| IndexError::Sqlite(e))?;
        info!(path = %self.path.display(), "Closed index store");
        Ok(())
    }
}

fn configure(conn: &Connection, config: &IndexConfig) -> Result<(), IndexError> {
    // busy_timeout first so the journal_mode switch can wait for locks
    conn.busy_timeout(config.busy_timeout())?;
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA wal_autocheckpoint = {};",
        config.wal_auto_checkpoint_pages
    ))?;
    Ok(())
}

/// Record the owner on a store that has none yet
fn adopt_identity(conn: &Connection, identity: Option<&ProjectIdentity>) -> Result<(), IndexError> {
    let Some(identity) = identity else {
        return Ok(());
    };
    conn.execute(
        "UPDATE schema_info SET project_id = ?1, project_name = ?2
         WHERE id = 1 AND project_id IS NULL",
        rusqlite::params![identity.id, identity.name],
    )?;
    Ok(())
}
