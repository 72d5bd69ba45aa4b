//! Database connection management

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use codex_core::{ContentStats, SCHEMA_VERSION};

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database not found at {0}")]
    NotFound(PathBuf),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database not initialized (run: codex-index sync)")]
    NotInitialized,

    #[error("Database version mismatch: expected {expected}, found {found} (run: codex-index rebuild)")]
    VersionMismatch { expected: i32, found: i32 },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Default database location inside a project directory
pub fn default_db_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".project").join("indexes.sqlite")
}

/// Read-only connection to the index
pub struct IndexReader {
    pub(crate) conn: Connection,
    path: PathBuf,
}

impl IndexReader {
    /// Open the index of a project directory
    pub fn open_project(project_dir: &Path) -> Result<Self, DbError> {
        Self::open(default_db_path(project_dir))
    }

    /// Open the database at a specific path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(DbError::NotFound(path));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let reader = Self { conn, path };
        reader.check_version()?;

        Ok(reader)
    }

    /// Refuse stores written by another schema version
    fn check_version(&self) -> Result<(), DbError> {
        match self.schema_version() {
            None => Err(DbError::NotInitialized),
            Some(v) if v != SCHEMA_VERSION => Err(DbError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: v,
            }),
            Some(_) => Ok(()),
        }
    }

    fn schema_version(&self) -> Option<i32> {
        self.conn
            .query_row("SELECT version FROM schema_info WHERE id = 1", [], |row| {
                row.get(0)
            })
            .ok()
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the underlying connection (for custom queries)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Project that owns this store, if recorded
    pub fn project_id(&self) -> Result<Option<String>, DbError> {
        let id = self
            .conn
            .query_row(
                "SELECT project_id FROM schema_info WHERE id = 1",
                [],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(id)
    }

    /// Get aggregate counts over indexed content
    pub fn content_stats(&self) -> Result<ContentStats, DbError> {
        let stats = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM cells),
                (SELECT COALESCE(SUM(s_word_count + t_word_count), 0) FROM cells),
                (SELECT COUNT(*) FROM files)",
            [],
            |row| {
                Ok(ContentStats {
                    total_cells: row.get(0)?,
                    total_words: row.get(1)?,
                    total_files: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Get sync bookkeeping statistics
    pub fn sync_statistics(&self) -> Result<SyncStatistics, DbError> {
        let (total_files, source_files, codex_files, last_synced_ms, with_commit, total_bytes) =
            self.conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(file_type = 'source'), 0),
                    COALESCE(SUM(file_type = 'codex'), 0),
                    MAX(last_synced_ms),
                    COALESCE(SUM(git_commit_hash IS NOT NULL), 0),
                    COALESCE(SUM(file_size), 0)
                 FROM sync_metadata",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )?;

        let db_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);

        Ok(SyncStatistics {
            schema_version: self.schema_version().unwrap_or(0),
            total_files,
            source_files,
            codex_files,
            last_synced_at: last_synced_ms.and_then(DateTime::<Utc>::from_timestamp_millis),
            files_with_commit_hash: with_commit,
            total_bytes: total_bytes.max(0) as u64,
            db_path: self.path.clone(),
            db_size_bytes: db_size,
        })
    }
}

/// Sync bookkeeping statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub schema_version: i32,
    pub total_files: i64,
    pub source_files: i64,
    pub codex_files: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub files_with_commit_hash: i64,
    /// Sum of tracked file sizes
    pub total_bytes: u64,
    pub db_path: PathBuf,
    pub db_size_bytes: u64,
}

impl SyncStatistics {
    /// Format database size as human-readable string
    pub fn format_size(&self) -> String {
        let bytes = self.db_size_bytes as f64;
        if bytes < 1024.0 {
            format!("{} B", bytes)
        } else if bytes < 1024.0 * 1024.0 {
            format!("{:.1} KB", bytes / 1024.0)
        } else if bytes < 1024.0 * 1024.0 * 1024.0 {
            format!("{:.1} MB", bytes / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes / (1024.0 * 1024.0 * 1024.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path() {
        let path = default_db_path(Path::new("/work/genesis"));
        assert_eq!(path, PathBuf::from("/work/genesis/.project/indexes.sqlite"));
    }

    #[test]
    fn test_missing_database() {
        let tmp = tempfile::tempdir().unwrap();
        let result = IndexReader::open(tmp.path().join("nope.sqlite"));
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_uninitialized_database() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (id INTEGER)")
            .unwrap();
        assert!(matches!(
            IndexReader::open(&path),
            Err(DbError::NotInitialized)
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("old.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE schema_info (id INTEGER PRIMARY KEY, version INTEGER NOT NULL);
                 INSERT INTO schema_info (id, version) VALUES (1, 999);",
            )
            .unwrap();
        match IndexReader::open(&path) {
            Err(DbError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, SCHEMA_VERSION);
                assert_eq!(found, 999);
            }
            other => panic!("expected version mismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_format_size() {
        let stats = SyncStatistics {
            schema_version: SCHEMA_VERSION,
            total_files: 0,
            source_files: 0,
            codex_files: 0,
            last_synced_at: None,
            files_with_commit_hash: 0,
            total_bytes: 0,
            db_path: PathBuf::from("x"),
            db_size_bytes: 2048,
        };
        assert_eq!(stats.format_size(), "2.0 KB");
    }
}
