//! Manual maintenance of the `cells_fts` shadow table
//!
//! Triggers keep FTS rows in step with every cell write. The operations here
//! cover what triggers cannot: bulk rebuilds, explicit per-cell resync, and
//! cleanup of rows whose cell has gone.

use rusqlite::types::ToSql;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::connection::{IndexDb, IndexError};

const INSERT_FROM_CELLS: &str = "
INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
SELECT cell_id, s_content, COALESCE(s_raw_content, s_content), 'source'
FROM cells WHERE s_content IS NOT NULL {filter}
UNION ALL
SELECT cell_id, t_content, COALESCE(t_raw_content, t_content), 'target'
FROM cells WHERE t_content IS NOT NULL {filter}";

/// Recompute the whole FTS table from `cells`. Returns the number of rows written.
pub fn rebuild_fts(conn: &Connection) -> Result<usize, IndexError> {
    conn.execute("DELETE FROM cells_fts", [])?;
    conn.execute(&INSERT_FROM_CELLS.replace("{filter}", ""), [])?;
    let rows = fts_row_count(conn)?;
    info!(rows, "Rebuilt FTS index");
    Ok(rows)
}

fn fts_row_count(conn: &Connection) -> Result<usize, IndexError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM cells_fts", [], |row| row.get(0))?;
    Ok(count.max(0) as usize)
}

/// Replace the FTS rows of one cell with its current content
pub fn resync_cell(conn: &Connection, cell_id: &str) -> Result<(), IndexError> {
    conn.execute("DELETE FROM cells_fts WHERE cell_id = ?1", [cell_id])?;
    conn.execute(
        &INSERT_FROM_CELLS.replace("{filter}", "AND cell_id = ?1"),
        [cell_id],
    )?;
    Ok(())
}

/// Delete FTS rows whose cell no longer exists, `batch_size` ids per statement.
/// Returns the number of rows removed.
pub fn cleanup_orphans(conn: &Connection, batch_size: usize) -> Result<usize, IndexError> {
    let orphans: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT cell_id FROM cells_fts
             WHERE cell_id NOT IN (SELECT cell_id FROM cells)",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        ids
    };

    if orphans.is_empty() {
        return Ok(0);
    }

    let before = fts_row_count(conn)?;
    for chunk in orphans.chunks(batch_size.max(1)) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("DELETE FROM cells_fts WHERE cell_id IN ({})", placeholders);
        let values: Vec<&dyn ToSql> = chunk.iter().map(|id| id as &dyn ToSql).collect();
        conn.execute(&sql, values.as_slice())?;
    }
    let removed = before.saturating_sub(fts_row_count(conn)?);

    if removed > 0 {
        debug!(removed, "Removed orphaned FTS rows");
    }
    Ok(removed)
}

/// Differences between `cells` and `cells_fts`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FtsParity {
    /// Non-null cell sides without an FTS row
    pub missing: i64,
    /// (cell, content type) pairs with more than one FTS row
    pub duplicates: i64,
    /// FTS rows for a side that is now null
    pub stale: i64,
    /// FTS rows whose cell is gone
    pub orphans: i64,
}

impl FtsParity {
    pub fn is_consistent(&self) -> bool {
        self.missing == 0 && self.duplicates == 0 && self.stale == 0 && self.orphans == 0
    }
}

pub fn check_parity(conn: &Connection) -> Result<FtsParity, IndexError> {
    let parity = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM cells c WHERE c.s_content IS NOT NULL AND NOT EXISTS
                (SELECT 1 FROM cells_fts f WHERE f.cell_id = c.cell_id AND f.content_type = 'source'))
          + (SELECT COUNT(*) FROM cells c WHERE c.t_content IS NOT NULL AND NOT EXISTS
                (SELECT 1 FROM cells_fts f WHERE f.cell_id = c.cell_id AND f.content_type = 'target')),
            (SELECT COUNT(*) FROM
                (SELECT cell_id FROM cells_fts GROUP BY cell_id, content_type HAVING COUNT(*) > 1)),
            (SELECT COUNT(*) FROM cells_fts f JOIN cells c ON c.cell_id = f.cell_id
                WHERE (f.content_type = 'source' AND c.s_content IS NULL)
                   OR (f.content_type = 'target' AND c.t_content IS NULL)),
            (SELECT COUNT(*) FROM cells_fts WHERE cell_id NOT IN (SELECT cell_id FROM cells))",
        [],
        |row| {
            Ok(FtsParity {
                missing: row.get(0)?,
                duplicates: row.get(1)?,
                stale: row.get(2)?,
                orphans: row.get(3)?,
            })
        },
    )?;
    Ok(parity)
}

/// Cells whose FTS rows do not match their non-null sides: a side without a
/// row, a side with several rows, or a row for a side that is now null
pub fn drifted_cells(conn: &Connection) -> Result<Vec<String>, IndexError> {
    let mut stmt = conn.prepare(
        "WITH counts AS (
             SELECT cell_id,
                    SUM(content_type = 'source') AS source_rows,
                    SUM(content_type = 'target') AS target_rows
             FROM cells_fts GROUP BY cell_id
         )
         SELECT c.cell_id FROM cells c LEFT JOIN counts k ON k.cell_id = c.cell_id
         WHERE COALESCE(k.source_rows, 0) != (c.s_content IS NOT NULL)
            OR COALESCE(k.target_rows, 0) != (c.t_content IS NOT NULL)
         ORDER BY c.cell_id",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// How [`repair_parity`] brought the FTS table back in step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FtsRepair {
    /// Nothing to do
    Consistent,
    /// Only orphaned rows were found; they were deleted
    OrphansRemoved(usize),
    /// A few cells drifted; each was resynced, then orphans were deleted
    CellsResynced(usize),
    /// More than a batch of cells drifted; the table was rebuilt
    Rebuilt(usize),
}

/// Restore parity with the cheapest operation that covers the drift.
///
/// Drift in up to `batch_size` cells is fixed cell by cell. Anything wider
/// rebuilds the whole table.
pub fn repair_parity(conn: &Connection, batch_size: usize) -> Result<FtsRepair, IndexError> {
    if check_parity(conn)?.is_consistent() {
        return Ok(FtsRepair::Consistent);
    }

    let drifted = drifted_cells(conn)?;
    if drifted.len() > batch_size.max(1) {
        return Ok(FtsRepair::Rebuilt(rebuild_fts(conn)?));
    }
    for cell_id in &drifted {
        resync_cell(conn, cell_id)?;
    }
    let removed = cleanup_orphans(conn, batch_size)?;

    if drifted.is_empty() {
        Ok(FtsRepair::OrphansRemoved(removed))
    } else {
        debug!(cells = drifted.len(), "Resynced drifted FTS rows");
        Ok(FtsRepair::CellsResynced(drifted.len()))
    }
}

impl IndexDb {
    /// [`repair_parity`] in one write transaction
    pub fn repair_fts(&mut self) -> Result<FtsRepair, IndexError> {
        let batch = self.config().fts_orphan_batch_size;
        self.write("repair_fts", |conn| repair_parity(conn, batch))
    }

    pub fn fts_parity(&self) -> Result<FtsParity, IndexError> {
        check_parity(self.connection()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_core::IndexConfig;

    fn seeded() -> IndexDb {
        let mut db = IndexDb::open_in_memory(&IndexConfig::default()).unwrap();
        db.write("seed", |conn| {
            conn.execute_batch(
                "INSERT INTO cells (cell_id, s_content, t_content) VALUES ('GEN 1:1', 'beginning', 'commencement');
                 INSERT INTO cells (cell_id, s_content) VALUES ('GEN 1:2', 'earth');",
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    fn fts_rows(db: &IndexDb, cell_id: &str) -> i64 {
        db.connection()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM cells_fts WHERE cell_id = ?1",
                [cell_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_triggers_keep_parity() {
        let mut db = seeded();
        assert!(db.fts_parity().unwrap().is_consistent());
        assert_eq!(fts_rows(&db, "GEN 1:1"), 2);

        db.write("update", |conn| {
            conn.execute("UPDATE cells SET t_content = NULL WHERE cell_id = 'GEN 1:1'", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fts_rows(&db, "GEN 1:1"), 1);

        db.write("delete", |conn| {
            conn.execute("DELETE FROM cells WHERE cell_id = 'GEN 1:1'", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fts_rows(&db, "GEN 1:1"), 0);
        assert!(db.fts_parity().unwrap().is_consistent());
    }

    #[test]
    fn test_rebuild_restores_parity() {
        let mut db = seeded();
        db.write("corrupt", |conn| {
            conn.execute("DELETE FROM cells_fts WHERE cell_id = 'GEN 1:2'", [])?;
            conn.execute(
                "INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
                 VALUES ('GEN 1:1', 'dup', 'dup', 'source')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let parity = db.fts_parity().unwrap();
        assert_eq!(parity.missing, 1);
        assert_eq!(parity.duplicates, 1);

        assert_eq!(db.write("rebuild", rebuild_fts).unwrap(), 3);
        assert!(db.fts_parity().unwrap().is_consistent());
    }

    #[test]
    fn test_resync_single_cell() {
        let mut db = seeded();
        db.write("corrupt", |conn| {
            conn.execute("DELETE FROM cells_fts WHERE cell_id = 'GEN 1:1'", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fts_rows(&db, "GEN 1:1"), 0);

        db.write("resync", |conn| resync_cell(conn, "GEN 1:1")).unwrap();
        assert_eq!(fts_rows(&db, "GEN 1:1"), 2);
        assert!(db.fts_parity().unwrap().is_consistent());
    }

    #[test]
    fn test_cleanup_orphans_in_batches() {
        let config = IndexConfig {
            fts_orphan_batch_size: 2,
            ..IndexConfig::default()
        };
        let mut db = IndexDb::open_in_memory(&config).unwrap();
        db.write("orphans", |conn| {
            for i in 0..5 {
                conn.execute(
                    "INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
                     VALUES (?1, 'x', 'x', 'source')",
                    [format!("ghost {}", i)],
                )?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(db.fts_parity().unwrap().orphans, 5);

        assert_eq!(db.write("cleanup", |conn| cleanup_orphans(conn, 2)).unwrap(), 5);
        assert!(db.fts_parity().unwrap().is_consistent());
    }

    #[test]
    fn test_drifted_cells_lists_every_kind_of_drift() {
        let mut db = seeded();
        db.write("corrupt", |conn| {
            conn.execute_batch(
                "INSERT INTO cells (cell_id, s_content) VALUES ('GEN 1:3', 'light');
                 DELETE FROM cells_fts WHERE cell_id = 'GEN 1:3';
                 INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
                 VALUES ('GEN 1:2', 'dup', 'dup', 'source');
                 INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
                 VALUES ('GEN 1:2', 'old', 'old', 'target');
                 INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
                 VALUES ('ghost', 'x', 'x', 'source');",
            )?;
            Ok(())
        })
        .unwrap();

        let drifted = drifted_cells(db.connection().unwrap()).unwrap();
        assert_eq!(drifted, vec!["GEN 1:2".to_string(), "GEN 1:3".to_string()]);
    }

    #[test]
    fn test_repair_removes_only_orphans() {
        let mut db = seeded();
        db.write("orphan", |conn| {
            conn.execute(
                "INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
                 VALUES ('ghost', 'x', 'x', 'source')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.repair_fts().unwrap(), FtsRepair::OrphansRemoved(1));
        assert!(db.fts_parity().unwrap().is_consistent());
        assert_eq!(fts_rows(&db, "GEN 1:1"), 2);
        assert_eq!(db.repair_fts().unwrap(), FtsRepair::Consistent);
    }

    #[test]
    fn test_repair_resyncs_few_drifted_cells() {
        let mut db = seeded();
        db.write("corrupt", |conn| {
            conn.execute("DELETE FROM cells_fts WHERE cell_id = 'GEN 1:1'", [])?;
            conn.execute(
                "INSERT INTO cells_fts(cell_id, content, raw_content, content_type)
                 VALUES ('ghost', 'x', 'x', 'source')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.repair_fts().unwrap(), FtsRepair::CellsResynced(1));
        assert_eq!(fts_rows(&db, "GEN 1:1"), 2);
        assert!(db.fts_parity().unwrap().is_consistent());
    }

    #[test]
    fn test_repair_rebuilds_wide_drift() {
        let config = IndexConfig {
            fts_orphan_batch_size: 1,
            ..IndexConfig::default()
        };
        let mut db = IndexDb::open_in_memory(&config).unwrap();
        db.write("seed", |conn| {
            conn.execute_batch(
                "INSERT INTO cells (cell_id, s_content) VALUES ('GEN 1:1', 'beginning');
                 INSERT INTO cells (cell_id, s_content) VALUES ('GEN 1:2', 'earth');
                 DELETE FROM cells_fts;",
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.repair_fts().unwrap(), FtsRepair::Rebuilt(2));
        assert!(db.fts_parity().unwrap().is_consistent());
    }
}
