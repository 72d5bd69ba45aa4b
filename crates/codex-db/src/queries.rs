//! Database query functions

use rusqlite::{OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use crate::connection::{DbError, IndexReader};
use codex_core::ContentSide;

/// Options for full-text search
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: i64,
    /// Restrict to one side of the cells
    pub content_type: Option<ContentSide>,
    /// Pass the query through as an FTS5 expression
    pub raw: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            content_type: None,
            raw: false,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_content_type(mut self, side: ContentSide) -> Self {
        self.content_type = Some(side);
        self
    }
}

/// One full-text match
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub cell_id: String,
    pub content_type: ContentSide,
    /// Matched terms wrapped in `[` `]`
    pub snippet: String,
    /// Negated bm25; higher is better
    pub score: f64,
}

/// One side of a stored cell
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSide {
    pub file_path: Option<String>,
    pub content: String,
    pub raw_content: Option<String>,
    pub line_number: Option<i64>,
    pub word_count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub count: i64,
    pub validated_by: Vec<String>,
    pub fully_validated: bool,
}

/// A stored cell with both sides
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRecord {
    pub cell_id: String,
    pub milestone_index: Option<i64>,
    pub metadata: Option<Value>,
    pub source: Option<CellSide>,
    pub target: Option<CellSide>,
    pub validation: ValidationSummary,
    pub audio_validation: ValidationSummary,
}

/// Quote each whitespace-separated term and OR them together
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w.replace('"', "")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl IndexReader {
    /// Search cell content using FTS, best matches first
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>, DbError> {
        let fts_query = if options.raw {
            query.trim().to_string()
        } else {
            escape_fts_query(query)
        };
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            r#"
            SELECT
                cell_id,
                content_type,
                snippet(cells_fts, 1, '[', ']', '…', 16),
                bm25(cells_fts)
            FROM cells_fts
            WHERE cells_fts MATCH ?
            "#,
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(fts_query)];

        if let Some(side) = options.content_type {
            sql.push_str(" AND content_type = ?");
            params.push(Box::new(side.as_str()));
        }

        sql.push_str(" ORDER BY bm25(cells_fts) LIMIT ?");
        params.push(Box::new(options.limit));

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let content_type: String = row.get(1)?;
            let bm25: f64 = row.get(3)?;
            Ok((row.get::<_, String>(0)?, content_type, row.get::<_, String>(2)?, bm25))
        });
        // FTS5 syntax errors surface when the statement runs
        let rows = rows.map_err(|e| invalid_query(e, options.raw))?;

        let mut hits = Vec::new();
        for row in rows {
            let (cell_id, content_type, snippet, bm25) =
                row.map_err(|e| invalid_query(e, options.raw))?;
            let Ok(content_type) = content_type.parse::<ContentSide>() else {
                continue;
            };
            hits.push(SearchHit {
                cell_id,
                content_type,
                snippet,
                score: -bm25,
            });
        }

        Ok(hits)
    }

    /// Get a cell by id with both sides
    pub fn cell(&self, cell_id: &str) -> Result<Option<CellRecord>, DbError> {
        let sql = r#"
            SELECT
                c.cell_id, c.milestone_index, c.metadata,
                c.s_content, c.s_raw_content, c.s_line_number, c.s_word_count, sf.file_path,
                c.t_content, c.t_raw_content, c.t_line_number, c.t_word_count, tf.file_path,
                c.t_validation_count, c.t_validated_by, c.t_is_fully_validated,
                c.t_audio_validation_count, c.t_audio_validated_by, c.t_audio_is_fully_validated
            FROM cells c
            LEFT JOIN files sf ON sf.id = c.s_file_id
            LEFT JOIN files tf ON tf.id = c.t_file_id
            WHERE c.cell_id = ?
        "#;
        let record = self
            .conn
            .query_row(sql, [cell_id], row_to_cell_record)
            .optional()?;
        Ok(record)
    }

    /// Cell ids of one file in document order
    pub fn cells_for_file(&self, file_path: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.cell_id FROM cells c
             JOIN files f ON f.id = c.s_file_id OR f.id = c.t_file_id
             WHERE f.file_path = ?1
             ORDER BY CASE WHEN f.file_type = 'source' THEN c.s_line_number ELSE c.t_line_number END",
        )?;
        let rows = stmt.query_map([file_path], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

fn invalid_query(e: rusqlite::Error, raw: bool) -> DbError {
    if raw {
        if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &e {
            if msg.contains("fts5") {
                return DbError::InvalidQuery(msg.clone());
            }
        }
    }
    DbError::Sqlite(e)
}

fn cell_side(row: &Row<'_>, start: usize) -> rusqlite::Result<Option<CellSide>> {
    let content: Option<String> = row.get(start)?;
    Ok(match content {
        Some(content) => Some(CellSide {
            content,
            raw_content: row.get(start + 1)?,
            line_number: row.get(start + 2)?,
            word_count: row.get(start + 3)?,
            file_path: row.get(start + 4)?,
        }),
        None => None,
    })
}

fn validation(row: &Row<'_>, start: usize) -> rusqlite::Result<ValidationSummary> {
    let validated_by: Option<String> = row.get(start + 1)?;
    Ok(ValidationSummary {
        count: row.get(start)?,
        validated_by: validated_by
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default(),
        fully_validated: row.get(start + 2)?,
    })
}

fn row_to_cell_record(row: &Row<'_>) -> rusqlite::Result<CellRecord> {
    let metadata: Option<String> = row.get(2)?;
    Ok(CellRecord {
        cell_id: row.get(0)?,
        milestone_index: row.get(1)?,
        metadata: metadata.and_then(|json| serde_json::from_str(&json).ok()),
        source: cell_side(row, 3)?,
        target: cell_side(row, 8)?,
        validation: validation(row, 13)?,
        audio_validation: validation(row, 16)?,
    })
}
