//! Index store: files, cells, words and sync metadata
//!
//! Functions here take a plain [`Connection`] and expect the caller to hold a
//! transaction (see [`IndexDb::write`]). The `IndexDb` methods at the bottom
//! wrap the same operations in their own retried transaction.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use codex_core::text::{searchable_text, word_count, word_tokens, WordToken};
use codex_core::{text_hash, CellMetadata, ContentSide, ContentStats, FileType, IndexConfig};

use crate::connection::{IndexDb, IndexError};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// A tracked file row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub file_type: FileType,
    pub last_modified_ms: i64,
    pub content_hash: String,
    pub total_cells: i64,
    pub total_words: i64,
}

/// One side of a cell to be written
#[derive(Debug, Clone)]
pub struct CellWrite<'a> {
    pub cell_id: &'a str,
    pub file_id: i64,
    pub side: ContentSide,
    /// Value as edited; markup is stripped for the searchable column
    pub value: &'a str,
    /// Formatted value; `value` is used when absent
    pub raw_value: Option<&'a str>,
    /// 1-based position in the file
    pub line_number: i64,
    pub metadata: &'a Value,
}

/// What [`upsert_cell`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellChange {
    Inserted,
    Updated,
    Unchanged,
}

/// Per-file change detection record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetadata {
    pub path: String,
    pub file_type: FileType,
    pub content_hash: String,
    pub file_size: u64,
    pub last_modified_ms: i64,
    pub last_synced_ms: i64,
    pub git_commit_hash: Option<String>,
}

fn file_type_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<FileType> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Insert or update a file row and return its id.
///
/// A file's type is fixed on first insert; asking for another type fails
/// with [`IndexError::FileTypeChanged`].
pub fn upsert_file(
    conn: &Connection,
    path: &str,
    file_type: FileType,
    last_modified_ms: i64,
    content_hash: &str,
) -> Result<i64, IndexError> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT file_type FROM files WHERE file_path = ?1",
            [path],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(stored) = stored {
        if stored != file_type.as_str() {
            return Err(IndexError::FileTypeChanged {
                path: path.to_string(),
                stored,
                requested: file_type.as_str().to_string(),
            });
        }
    }

    conn.prepare_cached(
        "INSERT INTO files (file_path, file_type, last_modified_ms, content_hash)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(file_path) DO UPDATE SET
            last_modified_ms = excluded.last_modified_ms,
            content_hash = excluded.content_hash",
    )?
    .execute(params![path, file_type.as_str(), last_modified_ms, content_hash])?;

    let id = conn.query_row(
        "SELECT id FROM files WHERE file_path = ?1",
        [path],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_file(conn: &Connection, path: &str) -> Result<Option<FileRecord>, IndexError> {
    let record = conn
        .query_row(
            "SELECT id, file_path, file_type, last_modified_ms, content_hash, total_cells, total_words
             FROM files WHERE file_path = ?1",
            [path],
            |row| {
                Ok(FileRecord {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    file_type: file_type_column(row, 2)?,
                    last_modified_ms: row.get(3)?,
                    content_hash: row.get(4)?,
                    total_cells: row.get(5)?,
                    total_words: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn file_side(conn: &Connection, file_id: i64) -> Result<Option<ContentSide>, IndexError> {
    let file_type = conn
        .query_row(
            "SELECT file_type FROM files WHERE id = ?1",
            [file_id],
            |row| file_type_column(row, 0),
        )
        .optional()?;
    Ok(file_type.map(|t| t.side()))
}

/// Recompute `total_cells` / `total_words` for a file
pub fn update_file_aggregates(conn: &Connection, file_id: i64) -> Result<(), IndexError> {
    let Some(side) = file_side(conn, file_id)? else {
        return Ok(());
    };
    let p = side.column_prefix();
    conn.execute(
        &format!(
            "UPDATE files SET
                total_cells = (SELECT COUNT(*) FROM cells WHERE {p}_file_id = ?1),
                total_words = (SELECT COALESCE(SUM({p}_word_count), 0) FROM cells WHERE {p}_file_id = ?1)
             WHERE id = ?1"
        ),
        [file_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Insert or update one side of a cell.
///
/// Rows are keyed by cell id and never recreated; an identical write is a
/// no-op. Word rows are replaced only when the content hash changes.
pub fn upsert_cell(
    conn: &Connection,
    cell: &CellWrite<'_>,
    config: &IndexConfig,
) -> Result<CellChange, IndexError> {
    let p = cell.side.column_prefix();
    let raw = cell.raw_value.unwrap_or(cell.value);
    let content = searchable_text(cell.value);
    let hash = text_hash(raw);
    let words = word_count(&content);
    let metadata_json = match cell.metadata {
        Value::Null => None,
        other => Some(serde_json::to_string(other)?),
    };
    let meta = CellMetadata::from_value(cell.metadata);

    let existing: Option<(Option<String>, Option<i64>, Option<i64>, Option<String>)> = conn
        .query_row(
            &format!(
                "SELECT {p}_content_hash, {p}_file_id, {p}_line_number, metadata
                 FROM cells WHERE cell_id = ?1"
            ),
            [cell.cell_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let content_changed = match &existing {
        Some((stored_hash, file_id, line, stored_meta)) => {
            let same_content = stored_hash.as_deref() == Some(hash.as_str());
            let same_place = *file_id == Some(cell.file_id) && *line == Some(cell.line_number);
            // Source writes never replace metadata set by the target side
            let same_meta = cell.side == ContentSide::Source || *stored_meta == metadata_json;
            if same_content && same_place && same_meta {
                return Ok(CellChange::Unchanged);
            }
            !same_content
        }
        None => true,
    };

    let metadata_rule = match cell.side {
        ContentSide::Source => "COALESCE(cells.metadata, excluded.metadata)",
        ContentSide::Target => "excluded.metadata",
    };

    conn.prepare_cached(&format!(
        "INSERT INTO cells (
            cell_id, milestone_index, metadata,
            {p}_file_id, {p}_content, {p}_raw_content, {p}_content_hash,
            {p}_line_number, {p}_word_count, {p}_created_at, {p}_updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, {NOW}, {NOW})
         ON CONFLICT(cell_id) DO UPDATE SET
            milestone_index = COALESCE(excluded.milestone_index, cells.milestone_index),
            metadata = {metadata_rule},
            {p}_file_id = excluded.{p}_file_id,
            {p}_content = excluded.{p}_content,
            {p}_raw_content = excluded.{p}_raw_content,
            {p}_content_hash = excluded.{p}_content_hash,
            {p}_line_number = excluded.{p}_line_number,
            {p}_word_count = excluded.{p}_word_count,
            {p}_created_at = COALESCE(cells.{p}_created_at, excluded.{p}_created_at)"
    ))?
    .execute(params![
        cell.cell_id,
        meta.milestone_index,
        metadata_json,
        cell.file_id,
        content,
        raw,
        hash,
        cell.line_number,
        words,
    ])?;

    if cell.side == ContentSide::Target {
        let text = meta.text_validation(config.required_validations);
        let audio = meta.audio_validation(config.required_audio_validations);
        conn.prepare_cached(
            "UPDATE cells SET
                t_validation_count = ?2,
                t_validated_by = ?3,
                t_is_fully_validated = ?4,
                t_audio_validation_count = ?5,
                t_audio_validated_by = ?6,
                t_audio_is_fully_validated = ?7
             WHERE cell_id = ?1",
        )?
        .execute(params![
            cell.cell_id,
            text.count,
            text.validators_json(),
            text.fully_validated,
            audio.count,
            audio.validators_json(),
            audio.fully_validated,
        ])?;
    }

    if content_changed {
        refresh_words(conn, cell.cell_id, config.word_batch_size)?;
    }

    Ok(if existing.is_some() {
        CellChange::Updated
    } else {
        CellChange::Inserted
    })
}

/// Rebuild a cell's word rows from its target content, or its source
/// content when the target side is empty
pub fn refresh_words(conn: &Connection, cell_id: &str, batch_size: usize) -> Result<(), IndexError> {
    let contents: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT s_content, t_content FROM cells WHERE cell_id = ?1",
            [cell_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let tokens = match contents {
        Some((source, target)) => {
            let text = target
                .filter(|t| !t.trim().is_empty())
                .or(source)
                .unwrap_or_default();
            word_tokens(&text)
        }
        None => Vec::new(),
    };
    replace_words(conn, cell_id, &tokens, batch_size)
}

/// Delete a cell's words and insert `tokens` in multi-row chunks
pub fn replace_words(
    conn: &Connection,
    cell_id: &str,
    tokens: &[WordToken],
    batch_size: usize,
) -> Result<(), IndexError> {
    conn.prepare_cached("DELETE FROM words WHERE cell_id = ?1")?
        .execute([cell_id])?;

    for chunk in tokens.chunks(batch_size.max(1)) {
        let placeholders = vec!["(?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO words (word, cell_id, position, frequency) VALUES {}",
            placeholders
        );
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 4);
        for token in chunk {
            values.push(&token.word);
            values.push(&cell_id);
            values.push(&token.position);
            values.push(&token.frequency);
        }
        conn.prepare_cached(&sql)?.execute(values.as_slice())?;
    }
    Ok(())
}

/// Clear one side of a cell. Returns true if the cell was deleted because
/// neither side remained.
pub fn clear_cell_side(
    conn: &Connection,
    cell_id: &str,
    side: ContentSide,
    batch_size: usize,
) -> Result<bool, IndexError> {
    let p = side.column_prefix();
    let validation_reset = match side {
        ContentSide::Source => "",
        ContentSide::Target => {
            ", t_validation_count = 0, t_validated_by = NULL, t_is_fully_validated = 0,
               t_audio_validation_count = 0, t_audio_validated_by = NULL, t_audio_is_fully_validated = 0"
        }
    };
    conn.execute(
        &format!(
            "UPDATE cells SET
                {p}_file_id = NULL, {p}_content = NULL, {p}_raw_content = NULL,
                {p}_content_hash = NULL, {p}_line_number = NULL, {p}_word_count = 0
                {validation_reset}
             WHERE cell_id = ?1"
        ),
        [cell_id],
    )?;

    let deleted = conn.execute(
        "DELETE FROM cells WHERE cell_id = ?1 AND s_content IS NULL AND t_content IS NULL",
        [cell_id],
    )?;
    if deleted == 0 {
        refresh_words(conn, cell_id, batch_size)?;
    }
    Ok(deleted > 0)
}

fn cells_for_file(conn: &Connection, file_id: i64, side: ContentSide) -> Result<Vec<String>, IndexError> {
    let p = side.column_prefix();
    let mut stmt = conn.prepare(&format!(
        "SELECT cell_id FROM cells WHERE {p}_file_id = ?1 ORDER BY {p}_line_number"
    ))?;
    let ids = stmt
        .query_map([file_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Remove a file's side from every cell it contributed to.
///
/// Cells left with neither side are deleted. Returns the number of cells touched.
pub fn delete_cells_for_file(
    conn: &Connection,
    file_id: i64,
    batch_size: usize,
) -> Result<usize, IndexError> {
    let Some(side) = file_side(conn, file_id)? else {
        return Ok(0);
    };
    let ids = cells_for_file(conn, file_id, side)?;
    for id in &ids {
        clear_cell_side(conn, id, side, batch_size)?;
    }
    update_file_aggregates(conn, file_id)?;
    debug!(file_id, cells = ids.len(), "Deleted cells for file");
    Ok(ids.len())
}

/// Clear the file's side on cells it no longer contains
pub fn prune_missing_cells(
    conn: &Connection,
    file_id: i64,
    side: ContentSide,
    keep: &HashSet<&str>,
    batch_size: usize,
) -> Result<usize, IndexError> {
    let mut pruned = 0;
    for id in cells_for_file(conn, file_id, side)? {
        if !keep.contains(id.as_str()) {
            clear_cell_side(conn, &id, side, batch_size)?;
            pruned += 1;
        }
    }
    Ok(pruned)
}

/// Count word rows for a cell
pub fn word_row_count(conn: &Connection, cell_id: &str) -> Result<i64, IndexError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM words WHERE cell_id = ?1",
        [cell_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn content_stats(conn: &Connection) -> Result<ContentStats, IndexError> {
    let stats = conn.query_row(
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

/// Clear every content table. Schema info is kept.
pub fn remove_all(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch(
        "DELETE FROM words;
         DELETE FROM cells;
         DELETE FROM cells_fts;
         DELETE FROM files;
         DELETE FROM sync_metadata;",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync metadata
// ---------------------------------------------------------------------------

pub fn upsert_sync_metadata(conn: &Connection, record: &SyncMetadata) -> Result<(), IndexError> {
    conn.prepare_cached(
        "INSERT INTO sync_metadata
            (file_path, file_type, content_hash, file_size, last_modified_ms, last_synced_ms, git_commit_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(file_path) DO UPDATE SET
            file_type = excluded.file_type,
            content_hash = excluded.content_hash,
            file_size = excluded.file_size,
            last_modified_ms = excluded.last_modified_ms,
            last_synced_ms = excluded.last_synced_ms,
            git_commit_hash = COALESCE(excluded.git_commit_hash, sync_metadata.git_commit_hash)",
    )?
    .execute(params![
        record.path,
        record.file_type.as_str(),
        record.content_hash,
        record.file_size as i64,
        record.last_modified_ms,
        record.last_synced_ms,
        record.git_commit_hash,
    ])?;
    Ok(())
}

fn sync_metadata_from_row(row: &Row<'_>) -> rusqlite::Result<SyncMetadata> {
    Ok(SyncMetadata {
        path: row.get(0)?,
        file_type: file_type_column(row, 1)?,
        content_hash: row.get(2)?,
        file_size: row.get::<_, i64>(3)?.max(0) as u64,
        last_modified_ms: row.get(4)?,
        last_synced_ms: row.get(5)?,
        git_commit_hash: row.get(6)?,
    })
}

const SYNC_METADATA_COLUMNS: &str =
    "file_path, file_type, content_hash, file_size, last_modified_ms, last_synced_ms, git_commit_hash";

pub fn get_sync_metadata(conn: &Connection, path: &str) -> Result<Option<SyncMetadata>, IndexError> {
    let record = conn
        .query_row(
            &format!("SELECT {SYNC_METADATA_COLUMNS} FROM sync_metadata WHERE file_path = ?1"),
            [path],
            sync_metadata_from_row,
        )
        .optional()?;
    Ok(record)
}

/// All sync metadata rows, ordered by path
pub fn all_sync_metadata(conn: &Connection) -> Result<Vec<SyncMetadata>, IndexError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SYNC_METADATA_COLUMNS} FROM sync_metadata ORDER BY file_path"
    ))?;
    let rows = stmt
        .query_map([], sync_metadata_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete sync metadata for paths not in `known`. Returns the number removed.
pub fn delete_stale_sync_metadata(
    conn: &Connection,
    known: &HashSet<&str>,
) -> Result<usize, IndexError> {
    let stale: Vec<String> = {
        let mut stmt = conn.prepare("SELECT file_path FROM sync_metadata")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        paths
            .into_iter()
            .filter(|p| !known.contains(p.as_str()))
            .collect()
    };

    let mut delete = conn.prepare_cached("DELETE FROM sync_metadata WHERE file_path = ?1")?;
    for path in &stale {
        delete.execute([path])?;
    }
    if !stale.is_empty() {
        debug!(removed = stale.len(), "Removed stale sync metadata");
    }
    Ok(stale.len())
}

/// Drop files not in `known` along with their side of every cell.
/// Returns the number of files removed.
pub fn delete_stale_files(
    conn: &Connection,
    known: &HashSet<&str>,
    batch_size: usize,
) -> Result<usize, IndexError> {
    let stale: Vec<(i64, String)> = {
        let mut stmt = conn.prepare("SELECT id, file_path FROM files")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(i64, String)>, _>>()?;
        rows.into_iter()
            .filter(|(_, path)| !known.contains(path.as_str()))
            .collect()
    };

    for (id, path) in &stale {
        delete_cells_for_file(conn, *id, batch_size)?;
        conn.execute("DELETE FROM files WHERE id = ?1", [id])?;
        debug!(path = %path, "Removed file no longer provided");
    }
    Ok(stale.len())
}

// ---------------------------------------------------------------------------
// Transactional wrappers
// ---------------------------------------------------------------------------

impl IndexDb {
    pub fn upsert_file(
        &mut self,
        path: &str,
        file_type: FileType,
        last_modified_ms: i64,
        content_hash: &str,
    ) -> Result<i64, IndexError> {
        self.write("upsert_file", |conn| {
            upsert_file(conn, path, file_type, last_modified_ms, content_hash)
        })
    }

    pub fn upsert_cell(&mut self, cell: &CellWrite<'_>) -> Result<CellChange, IndexError> {
        let config = self.config().clone();
        self.write("upsert_cell", |conn| {
            let change = upsert_cell(conn, cell, &config)?;
            update_file_aggregates(conn, cell.file_id)?;
            Ok(change)
        })
    }

    pub fn delete_cells_for_file(&mut self, file_id: i64) -> Result<usize, IndexError> {
        let batch = self.config().word_batch_size;
        self.write("delete_cells_for_file", |conn| {
            delete_cells_for_file(conn, file_id, batch)
        })
    }

    pub fn content_stats(&self) -> Result<ContentStats, IndexError> {
        content_stats(self.connection()?)
    }

    pub fn remove_all(&mut self) -> Result<(), IndexError> {
        self.write("remove_all", remove_all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> IndexDb {
        IndexDb::open_in_memory(&IndexConfig::default()).unwrap()
    }

    fn write<'a>(
        cell_id: &'a str,
        file_id: i64,
        side: ContentSide,
        value: &'a str,
        metadata: &'a Value,
    ) -> CellWrite<'a> {
        CellWrite {
            cell_id,
            file_id,
            side,
            value,
            raw_value: None,
            line_number: 1,
            metadata,
        }
    }

    fn count(db: &IndexDb, sql: &str) -> i64 {
        db.connection()
            .unwrap()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_upsert_file_returns_stable_id() {
        let mut db = db();
        let first = db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let second = db.upsert_file("GEN.source", FileType::Source, 2, "b").unwrap();
        assert_eq!(first, second);

        let record = get_file(db.connection().unwrap(), "GEN.source").unwrap().unwrap();
        assert_eq!(record.content_hash, "b");
        assert_eq!(record.last_modified_ms, 2);
    }

    #[test]
    fn test_file_type_is_immutable() {
        let mut db = db();
        db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let err = db.upsert_file("GEN.source", FileType::Codex, 1, "a").unwrap_err();
        assert!(matches!(err, IndexError::FileTypeChanged { .. }));
    }

    #[test]
    fn test_upsert_cell_both_sides_share_row() {
        let mut db = db();
        let src = db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let tgt = db.upsert_file("GEN.codex", FileType::Codex, 1, "b").unwrap();
        let meta = Value::Null;

        db.upsert_cell(&write("GEN 1:1", src, ContentSide::Source, "In the beginning", &meta))
            .unwrap();
        db.upsert_cell(&write("GEN 1:1", tgt, ContentSide::Target, "Au commencement", &meta))
            .unwrap();

        assert_eq!(count(&db, "SELECT COUNT(*) FROM cells"), 1);
        let (s, t): (String, String) = db
            .connection()
            .unwrap()
            .query_row(
                "SELECT s_content, t_content FROM cells WHERE cell_id = 'GEN 1:1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(s, "In the beginning");
        assert_eq!(t, "Au commencement");
    }

    #[test]
    fn test_identical_write_is_unchanged() {
        let mut db = db();
        let src = db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let meta = Value::Null;
        let cell = write("GEN 1:1", src, ContentSide::Source, "In the beginning", &meta);

        assert_eq!(db.upsert_cell(&cell).unwrap(), CellChange::Inserted);
        assert_eq!(db.upsert_cell(&cell).unwrap(), CellChange::Unchanged);

        let changed = write("GEN 1:1", src, ContentSide::Source, "In the end", &meta);
        assert_eq!(db.upsert_cell(&changed).unwrap(), CellChange::Updated);
    }

    #[test]
    fn test_markup_stripped_raw_kept() {
        let mut db = db();
        let tgt = db.upsert_file("GEN.codex", FileType::Codex, 1, "a").unwrap();
        let meta = Value::Null;
        db.upsert_cell(&write(
            "GEN 1:1",
            tgt,
            ContentSide::Target,
            "<span class=\"x\">Au</span> commencement",
            &meta,
        ))
        .unwrap();

        let (content, raw, words): (String, String, i64) = db
            .connection()
            .unwrap()
            .query_row(
                "SELECT t_content, t_raw_content, t_word_count FROM cells",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(content, "Au commencement");
        assert!(raw.contains("<span"));
        assert_eq!(words, 2);
    }

    #[test]
    fn test_words_replaced_in_batches() {
        let mut db = db();
        let src = db.upsert_file("PSA.source", FileType::Source, 1, "a").unwrap();
        let long: String = (0..120).map(|i| format!("word{} ", i)).collect();
        let meta = Value::Null;

        db.upsert_cell(&write("PSA 119:1", src, ContentSide::Source, &long, &meta))
            .unwrap();
        assert_eq!(word_row_count(db.connection().unwrap(), "PSA 119:1").unwrap(), 120);

        db.upsert_cell(&write("PSA 119:1", src, ContentSide::Source, "short verse", &meta))
            .unwrap();
        assert_eq!(word_row_count(db.connection().unwrap(), "PSA 119:1").unwrap(), 2);
    }

    #[test]
    fn test_words_follow_target_when_present() {
        let mut db = db();
        let src = db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let tgt = db.upsert_file("GEN.codex", FileType::Codex, 1, "b").unwrap();
        let meta = Value::Null;

        db.upsert_cell(&write("GEN 1:1", tgt, ContentSide::Target, "un deux trois", &meta))
            .unwrap();
        db.upsert_cell(&write("GEN 1:1", src, ContentSide::Source, "one two", &meta))
            .unwrap();

        let words: Vec<String> = db
            .connection()
            .unwrap()
            .prepare("SELECT word FROM words WHERE cell_id = 'GEN 1:1' ORDER BY position")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(words, vec!["un", "deux", "trois"]);
    }

    #[test]
    fn test_validation_columns_from_metadata() {
        let mut db = db();
        let tgt = db.upsert_file("GEN.codex", FileType::Codex, 1, "a").unwrap();
        let meta = json!({
            "milestoneIndex": 3,
            "validatedBy": [{"username": "anna"}, {"username": "ben", "isDeleted": true}],
            "audioValidatedBy": []
        });
        db.upsert_cell(&write("GEN 1:1", tgt, ContentSide::Target, "Au commencement", &meta))
            .unwrap();

        let (milestone, count, by, full): (i64, i64, String, bool) = db
            .connection()
            .unwrap()
            .query_row(
                "SELECT milestone_index, t_validation_count, t_validated_by, t_is_fully_validated
                 FROM cells",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(milestone, 3);
        assert_eq!(count, 1);
        assert_eq!(by, "[\"anna\"]");
        assert!(full);
    }

    #[test]
    fn test_delete_cells_for_file_keeps_other_side() {
        let mut db = db();
        let src = db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let tgt = db.upsert_file("GEN.codex", FileType::Codex, 1, "b").unwrap();
        let meta = Value::Null;

        db.upsert_cell(&write("GEN 1:1", src, ContentSide::Source, "one", &meta)).unwrap();
        db.upsert_cell(&write("GEN 1:1", tgt, ContentSide::Target, "un", &meta)).unwrap();
        db.upsert_cell(&write("GEN 1:2", src, ContentSide::Source, "two", &meta)).unwrap();

        assert_eq!(db.delete_cells_for_file(src).unwrap(), 2);

        // GEN 1:2 had only a source side and is gone; GEN 1:1 keeps its target
        assert_eq!(count(&db, "SELECT COUNT(*) FROM cells"), 1);
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM cells WHERE s_content IS NULL AND t_content = 'un'"),
            1
        );
        assert_eq!(count(&db, "SELECT COUNT(*) FROM words WHERE cell_id = 'GEN 1:2'"), 0);
    }

    #[test]
    fn test_file_aggregates() {
        let mut db = db();
        let src = db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let meta = Value::Null;
        db.upsert_cell(&write("GEN 1:1", src, ContentSide::Source, "one two three", &meta))
            .unwrap();
        db.upsert_cell(&write("GEN 1:2", src, ContentSide::Source, "four five", &meta))
            .unwrap();

        let record = get_file(db.connection().unwrap(), "GEN.source").unwrap().unwrap();
        assert_eq!(record.total_cells, 2);
        assert_eq!(record.total_words, 5);
    }

    #[test]
    fn test_content_stats_and_remove_all() {
        let mut db = db();
        let src = db.upsert_file("GEN.source", FileType::Source, 1, "a").unwrap();
        let meta = Value::Null;
        db.upsert_cell(&write("GEN 1:1", src, ContentSide::Source, "one two three", &meta))
            .unwrap();

        let stats = db.content_stats().unwrap();
        assert_eq!(
            stats,
            ContentStats {
                total_cells: 1,
                total_words: 3,
                total_files: 1
            }
        );

        db.remove_all().unwrap();
        assert_eq!(db.content_stats().unwrap(), ContentStats::default());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM cells_fts"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM schema_info"), 1);
    }

    #[test]
    fn test_sync_metadata_gc() {
        let mut db = db();
        db.write("test", |conn| {
            for path in ["a.source", "b.source", "c.codex"] {
                upsert_sync_metadata(
                    conn,
                    &SyncMetadata {
                        path: path.to_string(),
                        file_type: FileType::from_path(path).unwrap(),
                        content_hash: "h".to_string(),
                        file_size: 1,
                        last_modified_ms: 1,
                        last_synced_ms: 1,
                        git_commit_hash: None,
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();

        let known: HashSet<&str> = ["a.source"].into_iter().collect();
        let removed = db
            .write("gc", |conn| delete_stale_sync_metadata(conn, &known))
            .unwrap();
        assert_eq!(removed, 2);

        let rows = all_sync_metadata(db.connection().unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path, "a.source");
    }
}
