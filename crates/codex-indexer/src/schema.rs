//! Database schema creation and inspection
//!
//! The SQL below is the single definition of the index layout. Production
//! code and tests both go through [`apply_schema`], so fixtures cannot drift
//! from the real tables.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::connection::IndexError;

pub use codex_core::SCHEMA_VERSION;

/// Content tables, in the order they must be dropped (children first)
pub const CONTENT_TABLES: &[&str] = &[
    "words",
    "cells_fts",
    "cells",
    "files",
    "sync_metadata",
    "schema_info",
];

const TABLES: &str = "
CREATE TABLE IF NOT EXISTS schema_info (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    project_id TEXT,
    project_name TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    file_type TEXT NOT NULL CHECK (file_type IN ('source', 'codex')),
    last_modified_ms INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    total_cells INTEGER NOT NULL DEFAULT 0,
    total_words INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS cells (
    cell_id TEXT PRIMARY KEY,
    milestone_index INTEGER,
    metadata TEXT,

    s_file_id INTEGER REFERENCES files(id) ON DELETE SET NULL,
    s_content TEXT,
    s_raw_content TEXT,
    s_content_hash TEXT,
    s_line_number INTEGER,
    s_word_count INTEGER NOT NULL DEFAULT 0,
    s_created_at TEXT,
    s_updated_at TEXT,

    t_file_id INTEGER REFERENCES files(id) ON DELETE SET NULL,
    t_content TEXT,
    t_raw_content TEXT,
    t_content_hash TEXT,
    t_line_number INTEGER,
    t_word_count INTEGER NOT NULL DEFAULT 0,
    t_created_at TEXT,
    t_updated_at TEXT,

    t_validation_count INTEGER NOT NULL DEFAULT 0,
    t_validated_by TEXT,
    t_is_fully_validated INTEGER NOT NULL DEFAULT 0,
    t_audio_validation_count INTEGER NOT NULL DEFAULT 0,
    t_audio_validated_by TEXT,
    t_audio_is_fully_validated INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS words (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    word TEXT NOT NULL,
    cell_id TEXT NOT NULL REFERENCES cells(cell_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    frequency INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS sync_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    file_type TEXT NOT NULL CHECK (file_type IN ('source', 'codex')),
    content_hash TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    last_modified_ms INTEGER NOT NULL,
    last_synced_ms INTEGER NOT NULL,
    git_commit_hash TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
";

/// Lookup indexes needed from the first write on
const PRIMARY_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_words_cell_id ON words(cell_id);
CREATE INDEX IF NOT EXISTS idx_cells_s_file_id ON cells(s_file_id);
CREATE INDEX IF NOT EXISTS idx_cells_t_file_id ON cells(t_file_id);
";

/// Secondary indexes, created after the first successful population so a
/// large initial import does not pay for them row by row
const DEFERRED_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_words_word ON words(word);
CREATE INDEX IF NOT EXISTS idx_cells_milestone_index ON cells(milestone_index);
CREATE INDEX IF NOT EXISTS idx_cells_t_is_fully_validated ON cells(t_is_fully_validated);
CREATE INDEX IF NOT EXISTS idx_files_file_type ON files(file_type);
CREATE INDEX IF NOT EXISTS idx_sync_metadata_file_type ON sync_metadata(file_type);
";

const DEFERRED_MARKER_INDEX: &str = "idx_words_word";

/// Standalone FTS5 table: one row per non-null cell side
const FTS_TABLE: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS cells_fts USING fts5(
    cell_id UNINDEXED,
    content,
    raw_content,
    content_type UNINDEXED,
    tokenize = 'unicode61 remove_diacritics 2'
);
";

/// Keep cells_fts in step with s_content / t_content
const CONTENT_TRIGGERS: &str = "
CREATE TRIGGER IF NOT EXISTS cells_fts_ai AFTER INSERT ON cells BEGIN
    INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
    SELECT new.cell_id, new.s_content, COALESCE(new.s_raw_content, new.s_content), 'source'
    WHERE new.s_content IS NOT NULL;
    INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
    SELECT new.cell_id, new.t_content, COALESCE(new.t_raw_content, new.t_content), 'target'
    WHERE new.t_content IS NOT NULL;
END;

CREATE TRIGGER IF NOT EXISTS cells_fts_source_au AFTER UPDATE OF s_content, s_raw_content ON cells BEGIN
    DELETE FROM cells_fts WHERE cell_id = old.cell_id AND content_type = 'source';
    INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
    SELECT new.cell_id, new.s_content, COALESCE(new.s_raw_content, new.s_content), 'source'
    WHERE new.s_content IS NOT NULL;
END;

CREATE TRIGGER IF NOT EXISTS cells_fts_target_au AFTER UPDATE OF t_content, t_raw_content ON cells BEGIN
    DELETE FROM cells_fts WHERE cell_id = old.cell_id AND content_type = 'target';
    INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
    SELECT new.cell_id, new.t_content, COALESCE(new.t_raw_content, new.t_content), 'target'
    WHERE new.t_content IS NOT NULL;
END;

CREATE TRIGGER IF NOT EXISTS cells_fts_ad AFTER DELETE ON cells BEGIN
    DELETE FROM cells_fts WHERE cell_id = old.cell_id;
END;
";

/// Stamp updated_at columns on mutation
const TIMESTAMP_TRIGGERS: &str = "
CREATE TRIGGER IF NOT EXISTS cells_source_touch AFTER UPDATE OF s_content ON cells
WHEN old.s_content IS NOT new.s_content BEGIN
    UPDATE cells SET s_updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE cell_id = new.cell_id;
END;

CREATE TRIGGER IF NOT EXISTS cells_target_touch AFTER UPDATE OF t_content ON cells
WHEN old.t_content IS NOT new.t_content BEGIN
    UPDATE cells SET t_updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE cell_id = new.cell_id;
END;

CREATE TRIGGER IF NOT EXISTS files_touch
AFTER UPDATE OF content_hash, last_modified_ms, total_cells, total_words ON files BEGIN
    UPDATE files SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = new.id;
END;

CREATE TRIGGER IF NOT EXISTS sync_metadata_touch
AFTER UPDATE OF content_hash, file_size, last_modified_ms, last_synced_ms ON sync_metadata BEGIN
    UPDATE sync_metadata SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = new.id;
END;

CREATE TRIGGER IF NOT EXISTS schema_info_touch
AFTER UPDATE OF version, project_id, project_name ON schema_info BEGIN
    UPDATE schema_info SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = 1;
END;
";

/// Identity of the project that owns an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub id: String,
    pub name: Option<String>,
}

impl ProjectIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The single schema_info row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    pub version: i32,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
}

/// What an existing store looks like relative to this build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Nothing there yet
    Missing,
    Current,
    VersionMismatch { found: i32 },
    ForeignProject { found: String },
    /// Tables or the schema_info row are missing or unreadable
    Corrupt(String),
}

impl SchemaStatus {
    /// Whether the index must be dropped and rebuilt
    pub fn requires_rebuild(&self) -> bool {
        !matches!(self, SchemaStatus::Missing | SchemaStatus::Current)
    }
}

/// Create every table, primary index, FTS table and trigger.
///
/// Idempotent; safe on an already-initialized store. Does not touch the
/// schema_info row.
pub fn apply_schema(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(TABLES)?;
    conn.execute_batch(PRIMARY_INDEXES)?;
    conn.execute_batch(FTS_TABLE)?;
    conn.execute_batch(CONTENT_TRIGGERS)?;
    conn.execute_batch(TIMESTAMP_TRIGGERS)?;
    Ok(())
}

/// Apply the schema and record version and identity if no row exists yet
pub fn init_schema(conn: &Connection, identity: Option<&ProjectIdentity>) -> Result<(), IndexError> {
    apply_schema(conn)?;
    if read_schema_info(conn)?.is_none() {
        write_schema_info(conn, SCHEMA_VERSION, identity)?;
        info!(version = SCHEMA_VERSION, "Initialized index schema");
    }
    Ok(())
}

/// Create the secondary indexes. Returns true if they were created by this call.
pub fn create_deferred_indexes(conn: &Connection) -> Result<bool, IndexError> {
    if deferred_indexes_present(conn)? {
        return Ok(false);
    }
    conn.execute_batch(DEFERRED_INDEXES)?;
    debug!("Created deferred indexes");
    Ok(true)
}

pub fn deferred_indexes_present(conn: &Connection) -> Result<bool, IndexError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        [DEFERRED_MARKER_INDEX],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn read_schema_info(conn: &Connection) -> Result<Option<SchemaInfo>, IndexError> {
    if !table_exists(conn, "schema_info")? {
        return Ok(None);
    }
    let info = conn
        .query_row(
            "SELECT version, project_id, project_name FROM schema_info WHERE id = 1",
            [],
            |row| {
                Ok(SchemaInfo {
                    version: row.get(0)?,
                    project_id: row.get(1)?,
                    project_name: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(info)
}

pub fn write_schema_info(
    conn: &Connection,
    version: i32,
    identity: Option<&ProjectIdentity>,
) -> Result<(), IndexError> {
    conn.execute(
        "INSERT INTO schema_info (id, version, project_id, project_name)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            version = excluded.version,
            project_id = excluded.project_id,
            project_name = excluded.project_name",
        rusqlite::params![
            version,
            identity.map(|i| i.id.as_str()),
            identity.and_then(|i| i.name.as_deref()),
        ],
    )?;
    Ok(())
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool, IndexError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Classify an existing store against this build and an expected owner.
///
/// A store without a recorded owner is adopted by the caller rather than
/// treated as foreign.
pub fn inspect_schema(
    conn: &Connection,
    expected: Option<&ProjectIdentity>,
) -> Result<SchemaStatus, IndexError> {
    let has_info_table = table_exists(conn, "schema_info")?;
    let has_content = table_exists(conn, "cells")? || table_exists(conn, "files")?;

    if !has_info_table {
        return Ok(if has_content {
            SchemaStatus::Corrupt("schema_info table missing".to_string())
        } else {
            SchemaStatus::Missing
        });
    }

    let info = match read_schema_info(conn) {
        Ok(Some(info)) => info,
        Ok(None) => return Ok(SchemaStatus::Corrupt("schema_info row missing".to_string())),
        Err(e) => return Ok(SchemaStatus::Corrupt(format!("schema_info unreadable: {}", e))),
    };

    if info.version != SCHEMA_VERSION {
        return Ok(SchemaStatus::VersionMismatch {
            found: info.version,
        });
    }

    if let (Some(expected), Some(found)) = (expected, info.project_id.as_ref()) {
        if &expected.id != found {
            return Ok(SchemaStatus::ForeignProject {
                found: found.clone(),
            });
        }
    }

    for table in CONTENT_TABLES {
        if !table_exists(conn, table)? {
            return Ok(SchemaStatus::Corrupt(format!("table {} missing", table)));
        }
    }

    Ok(SchemaStatus::Current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        init_schema(&conn, None).unwrap();
        conn
    }

    #[test]
    fn test_fresh_schema_creates_all_tables() {
        let conn = fresh();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in CONTENT_TABLES {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }

        let info = read_schema_info(&conn).unwrap().unwrap();
        assert_eq!(info.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = fresh();
        apply_schema(&conn).unwrap();
        init_schema(&conn, None).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_info", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_schema_info_is_single_row() {
        let conn = fresh();
        let result = conn.execute("INSERT INTO schema_info (id, version) VALUES (2, 1)", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_deferred_indexes_created_once() {
        let conn = fresh();
        assert!(!deferred_indexes_present(&conn).unwrap());
        assert!(create_deferred_indexes(&conn).unwrap());
        assert!(!create_deferred_indexes(&conn).unwrap());
        assert!(deferred_indexes_present(&conn).unwrap());
    }

    #[test]
    fn test_inspect_missing_and_current() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(inspect_schema(&conn, None).unwrap(), SchemaStatus::Missing);

        init_schema(&conn, None).unwrap();
        assert_eq!(inspect_schema(&conn, None).unwrap(), SchemaStatus::Current);
    }

    #[test]
    fn test_inspect_version_mismatch() {
        let conn = fresh();
        conn.execute("UPDATE schema_info SET version = 999", []).unwrap();
        let status = inspect_schema(&conn, None).unwrap();
        assert_eq!(status, SchemaStatus::VersionMismatch { found: 999 });
        assert!(status.requires_rebuild());
    }

    #[test]
    fn test_inspect_foreign_project() {
        let conn = Connection::open_in_memory().unwrap();
        let owner = ProjectIdentity::new("project-a").with_name("Genesis");
        init_schema(&conn, Some(&owner)).unwrap();

        assert_eq!(
            inspect_schema(&conn, Some(&owner)).unwrap(),
            SchemaStatus::Current
        );
        assert_eq!(
            inspect_schema(&conn, Some(&ProjectIdentity::new("project-b"))).unwrap(),
            SchemaStatus::ForeignProject {
                found: "project-a".to_string()
            }
        );
    }

    #[test]
    fn test_inspect_content_without_schema_info() {
        let conn = fresh();
        conn.execute_batch("DROP TABLE schema_info").unwrap();
        assert!(matches!(
            inspect_schema(&conn, None).unwrap(),
            SchemaStatus::Corrupt(_)
        ));
    }

    #[test]
    fn test_cells_table_columns() {
        let conn = fresh();
        let mut stmt = conn.prepare("PRAGMA table_info(cells)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        let expected = vec![
            "cell_id", "milestone_index", "s_content", "s_raw_content", "s_content_hash",
            "s_line_number", "s_word_count", "t_content", "t_raw_content", "t_content_hash",
            "t_validation_count", "t_validated_by", "t_is_fully_validated",
            "t_audio_validation_count", "t_audio_validated_by", "t_audio_is_fully_validated",
        ];
        for col in &expected {
            assert!(columns.contains(&col.to_string()), "Missing column: {}", col);
        }
    }
}
