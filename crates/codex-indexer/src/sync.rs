//! Change detection and file sync
//!
//! A file needs syncing when the hash of its bytes differs from the hash
//! recorded in `sync_metadata`. Modification time is never consulted here, so
//! touching a file without changing it does not trigger work.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use codex_core::{content_hash, CellInput, FileEntry, FileStat, IndexConfig};

use crate::connection::{IndexDb, IndexError};
use crate::provider::FileProvider;
use crate::schema;
use crate::store::{self, CellChange, CellWrite, SyncMetadata};

/// Why a file was selected for sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncReason {
    #[serde(rename = "new file")]
    NewFile,
    #[serde(rename = "changed content")]
    ChangedContent,
    #[serde(rename = "forced")]
    Forced,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::NewFile => "new file",
            SyncReason::ChangedContent => "changed content",
            SyncReason::Forced => "forced",
        }
    }
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDetail {
    pub reason: SyncReason,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
}

/// A file that could not be checked or synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub path: String,
    pub error: String,
}

/// Result of [`check_files_for_sync`]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheck {
    pub needs_sync: Vec<String>,
    pub unchanged: Vec<String>,
    pub details: BTreeMap<String, SyncDetail>,
    /// Files whose bytes could not be read
    pub errors: Vec<SyncFailure>,
}

/// Progress notification, sent before each file is synced
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// 1-based
    pub current: usize,
    pub total: usize,
    pub path: String,
}

#[derive(Default, Clone, Copy)]
pub struct SyncOptions<'a> {
    /// Sync every file regardless of hash
    pub force: bool,
    pub progress: Option<&'a dyn Fn(&SyncProgress)>,
    /// Checked between files
    pub cancel: Option<&'a AtomicBool>,
}

/// Result of [`sync_files`]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total_files: usize,
    pub synced_files: usize,
    pub unchanged_files: usize,
    pub errors: Vec<SyncFailure>,
    pub duration_ms: u64,
    pub details: BTreeMap<String, SyncDetail>,
    /// Stale sync metadata rows removed after the batch
    pub removed_metadata: usize,
    /// Files no longer provided whose cells were dropped
    pub removed_files: usize,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// A file read and parsed, ready to be written without touching the provider again
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub entry: FileEntry,
    pub content_hash: String,
    pub size: u64,
    pub stat: FileStat,
    pub cells: Vec<CellInput>,
}

/// Cell counts from writing one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileOutcome {
    pub cells_written: usize,
    pub cells_unchanged: usize,
    pub cells_pruned: usize,
}

struct Candidate {
    entry: FileEntry,
    content_hash: String,
    size: u64,
}

/// Stored content hash per path
fn stored_hashes(conn: &Connection) -> Result<HashMap<String, String>, IndexError> {
    let mut stmt = conn.prepare("SELECT file_path, content_hash FROM sync_metadata")?;
    let map = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<String, String>, _>>()?;
    Ok(map)
}

fn classify(
    provider: &dyn FileProvider,
    entries: &[FileEntry],
    stored: &HashMap<String, String>,
    force: bool,
) -> (Vec<Candidate>, SyncCheck) {
    let mut candidates = Vec::new();
    let mut check = SyncCheck::default();

    for entry in entries {
        let bytes = match provider.read_bytes(&entry.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Failed to read file for change detection");
                check.errors.push(SyncFailure {
                    path: entry.path.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        let hash = content_hash(&bytes);
        let old_hash = stored.get(&entry.path).cloned();

        let reason = match &old_hash {
            _ if force => Some(SyncReason::Forced),
            None => Some(SyncReason::NewFile),
            Some(old) if *old != hash => Some(SyncReason::ChangedContent),
            Some(_) => None,
        };

        match reason {
            Some(reason) => {
                check.needs_sync.push(entry.path.clone());
                check.details.insert(
                    entry.path.clone(),
                    SyncDetail {
                        reason,
                        old_hash,
                        new_hash: Some(hash.clone()),
                    },
                );
                candidates.push(Candidate {
                    entry: entry.clone(),
                    content_hash: hash,
                    size: bytes.len() as u64,
                });
            }
            None => check.unchanged.push(entry.path.clone()),
        }
    }

    (candidates, check)
}

/// Decide which of `entries` need syncing by comparing content hashes
pub fn check_files_for_sync(
    db: &IndexDb,
    provider: &dyn FileProvider,
    entries: &[FileEntry],
) -> Result<SyncCheck, IndexError> {
    check_files_on(db.connection()?, provider, entries)
}

/// [`check_files_for_sync`] over every file the provider lists
pub fn check_sync_status(db: &IndexDb, provider: &dyn FileProvider) -> Result<SyncCheck, IndexError> {
    check_sync_status_on(db.connection()?, provider)
}

/// [`check_sync_status`] over any connection to the store.
///
/// Only reads `sync_metadata`, so a read-only connection is enough.
pub fn check_sync_status_on(
    conn: &Connection,
    provider: &dyn FileProvider,
) -> Result<SyncCheck, IndexError> {
    let entries = provider.list_files()?;
    check_files_on(conn, provider, &entries)
}

fn check_files_on(
    conn: &Connection,
    provider: &dyn FileProvider,
    entries: &[FileEntry],
) -> Result<SyncCheck, IndexError> {
    let stored = stored_hashes(conn)?;
    let (_, check) = classify(provider, entries, &stored, false);
    Ok(check)
}

/// Read a file's cells and stat from the provider.
///
/// `known` carries a hash and size already computed from the file's bytes.
pub fn prepare_file(
    provider: &dyn FileProvider,
    entry: &FileEntry,
    known: Option<(String, u64)>,
) -> Result<PreparedFile, IndexError> {
    let (hash, size) = match known {
        Some(known) => known,
        None => {
            let bytes = provider.read_bytes(&entry.path)?;
            (content_hash(&bytes), bytes.len() as u64)
        }
    };
    let cells = provider.read_cells(entry)?;
    let stat = provider.stat(&entry.path)?;
    Ok(PreparedFile {
        entry: entry.clone(),
        content_hash: hash,
        size,
        stat,
        cells,
    })
}

/// Write a prepared file: file row, cells in document order, pruning of
/// cells it no longer has, aggregates, then its sync metadata
pub fn apply_prepared(
    conn: &Connection,
    file: &PreparedFile,
    config: &IndexConfig,
) -> Result<FileOutcome, IndexError> {
    let side = file.entry.file_type.side();
    let file_id = store::upsert_file(
        conn,
        &file.entry.path,
        file.entry.file_type,
        file.stat.mtime_ms,
        &file.content_hash,
    )?;

    let mut outcome = FileOutcome::default();
    let mut keep: HashSet<&str> = HashSet::with_capacity(file.cells.len());
    for (i, cell) in file.cells.iter().enumerate() {
        let change = store::upsert_cell(
            conn,
            &CellWrite {
                cell_id: &cell.id,
                file_id,
                side,
                value: &cell.value,
                raw_value: cell.raw_value.as_deref(),
                line_number: i as i64 + 1,
                metadata: &cell.metadata,
            },
            config,
        )?;
        match change {
            CellChange::Unchanged => outcome.cells_unchanged += 1,
            _ => outcome.cells_written += 1,
        }
        keep.insert(cell.id.as_str());
    }

    outcome.cells_pruned =
        store::prune_missing_cells(conn, file_id, side, &keep, config.word_batch_size)?;
    store::update_file_aggregates(conn, file_id)?;
    store::upsert_sync_metadata(
        conn,
        &SyncMetadata {
            path: file.entry.path.clone(),
            file_type: file.entry.file_type,
            content_hash: file.content_hash.clone(),
            file_size: file.size,
            last_modified_ms: file.stat.mtime_ms,
            last_synced_ms: chrono::Utc::now().timestamp_millis(),
            git_commit_hash: None,
        },
    )?;

    debug!(
        path = %file.entry.path,
        written = outcome.cells_written,
        unchanged = outcome.cells_unchanged,
        pruned = outcome.cells_pruned,
        "Synced file"
    );
    Ok(outcome)
}

struct BatchOutcome {
    synced: usize,
    errors: Vec<SyncFailure>,
    removed: usize,
    removed_files: usize,
    cancelled: bool,
}

fn run_batch(
    conn: &Connection,
    provider: &dyn FileProvider,
    candidates: &[Candidate],
    known: Option<&HashSet<&str>>,
    options: &SyncOptions<'_>,
    config: &IndexConfig,
) -> Result<BatchOutcome, IndexError> {
    let mut outcome = BatchOutcome {
        synced: 0,
        errors: Vec::new(),
        removed: 0,
        removed_files: 0,
        cancelled: false,
    };

    for (i, candidate) in candidates.iter().enumerate() {
        if options.cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false) {
            info!(done = i, total = candidates.len(), "Sync cancelled");
            outcome.cancelled = true;
            break;
        }
        if let Some(progress) = options.progress {
            progress(&SyncProgress {
                current: i + 1,
                total: candidates.len(),
                path: candidate.entry.path.clone(),
            });
        }

        conn.execute_batch("SAVEPOINT sync_file")?;
        let result = prepare_file(
            provider,
            &candidate.entry,
            Some((candidate.content_hash.clone(), candidate.size)),
        )
        .and_then(|prepared| apply_prepared(conn, &prepared, config));

        match result {
            Ok(_) => {
                conn.execute_batch("RELEASE sync_file")?;
                outcome.synced += 1;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK TO sync_file; RELEASE sync_file")?;
                if e.is_locked() {
                    return Err(e);
                }
                warn!(path = %candidate.entry.path, error = %e, "Failed to sync file");
                outcome.errors.push(SyncFailure {
                    path: candidate.entry.path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    if let Some(known) = known {
        outcome.removed = store::delete_stale_sync_metadata(conn, known)?;
        outcome.removed_files = store::delete_stale_files(conn, known, config.word_batch_size)?;
    }
    if outcome.synced > 0 {
        schema::create_deferred_indexes(conn)?;
    }
    Ok(outcome)
}

fn sync_entries(
    db: &mut IndexDb,
    provider: &dyn FileProvider,
    entries: &[FileEntry],
    options: &SyncOptions<'_>,
    collect_garbage: bool,
) -> Result<SyncReport, IndexError> {
    let start = Instant::now();
    let stored = stored_hashes(db.connection()?)?;
    let (candidates, check) = classify(provider, entries, &stored, options.force);

    let known: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    let config = db.config().clone();
    let batch = db.write("sync_files", |conn| {
        run_batch(
            conn,
            provider,
            &candidates,
            collect_garbage.then_some(&known),
            options,
            &config,
        )
    })?;

    let mut errors = check.errors;
    errors.extend(batch.errors);

    let report = SyncReport {
        total_files: entries.len(),
        synced_files: batch.synced,
        unchanged_files: check.unchanged.len(),
        errors,
        duration_ms: start.elapsed().as_millis() as u64,
        details: check.details,
        removed_metadata: batch.removed,
        removed_files: batch.removed_files,
        cancelled: batch.cancelled,
    };

    info!(
        total = report.total_files,
        synced = report.synced_files,
        unchanged = report.unchanged_files,
        errors = report.errors.len(),
        removed = report.removed_metadata,
        removed_files = report.removed_files,
        duration_ms = report.duration_ms,
        "Sync complete"
    );
    Ok(report)
}

/// Sync every file the provider lists.
///
/// All writes happen in one transaction; each file gets a savepoint so a
/// failing file is rolled back and reported without aborting the batch.
pub fn sync_files(
    db: &mut IndexDb,
    provider: &dyn FileProvider,
    options: &SyncOptions<'_>,
) -> Result<SyncReport, IndexError> {
    let entries = provider.list_files()?;
    sync_entries(db, provider, &entries, options, true)
}

/// Force-sync specific paths. Stale metadata is not collected.
pub fn sync_paths(
    db: &mut IndexDb,
    provider: &dyn FileProvider,
    paths: &[&str],
) -> Result<SyncReport, IndexError> {
    let wanted: HashSet<&str> = paths.iter().copied().collect();
    let entries: Vec<FileEntry> = provider
        .list_files()?
        .into_iter()
        .filter(|e| wanted.contains(e.path.as_str()))
        .collect();

    let options = SyncOptions {
        force: true,
        ..SyncOptions::default()
    };
    let mut report = sync_entries(db, provider, &entries, &options, false)?;

    for path in paths {
        if !entries.iter().any(|e| e.path == *path) {
            report.errors.push(SyncFailure {
                path: path.to_string(),
                error: "file is no longer provided".to_string(),
            });
        }
    }
    Ok(report)
}

/// Cheap change test from provider stat alone
pub fn stat_matches(record: &SyncMetadata, stat: &FileStat) -> bool {
    record.file_size == stat.size && record.last_modified_ms == stat.mtime_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;

    use crate::provider::DirectoryProvider;

    fn notebook(cells: &[(&str, &str)]) -> String {
        let cells: Vec<serde_json::Value> = cells
            .iter()
            .map(|(id, value)| serde_json::json!({"value": value, "metadata": {"id": id}}))
            .collect();
        serde_json::json!({ "cells": cells }).to_string()
    }

    fn write_notebook(dir: &Path, name: &str, cells: &[(&str, &str)]) -> String {
        let path = dir.join(name);
        fs::write(&path, notebook(cells)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn db() -> IndexDb {
        IndexDb::open_in_memory(&IndexConfig::default()).unwrap()
    }

    #[test]
    fn test_check_reports_new_changed_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let genesis = write_notebook(tmp.path(), "GEN.source", &[("GEN 1:1", "In the beginning")]);
        let exo = write_notebook(tmp.path(), "EXO.source", &[("EXO 1:1", "Now these")]);
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();

        let check = check_sync_status(&db, &provider).unwrap();
        assert_eq!(check.needs_sync.len(), 2);
        assert_eq!(check.details[&genesis].reason, SyncReason::NewFile);

        sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        write_notebook(tmp.path(), "GEN.source", &[("GEN 1:1", "In the very beginning")]);

        let check = check_sync_status(&db, &provider).unwrap();
        assert_eq!(check.needs_sync, vec![genesis.clone()]);
        assert_eq!(check.unchanged, vec![exo]);
        let detail = &check.details[&genesis];
        assert_eq!(detail.reason, SyncReason::ChangedContent);
        assert!(detail.old_hash.is_some());
        assert_ne!(detail.old_hash, detail.new_hash);
    }

    #[test]
    fn test_second_sync_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        write_notebook(tmp.path(), "GEN.source", &[("GEN 1:1", "In the beginning")]);
        write_notebook(tmp.path(), "GEN.codex", &[("GEN 1:1", "Au commencement")]);
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();

        let first = sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        assert_eq!(first.synced_files, 2);

        let second = sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        assert_eq!(second.synced_files, 0);
        assert_eq!(second.unchanged_files, second.total_files);
    }

    #[test]
    fn test_touch_without_change_does_not_resync() {
        let tmp = tempfile::tempdir().unwrap();
        let content = notebook(&[("GEN 1:1", "In the beginning")]);
        fs::write(tmp.path().join("GEN.source"), &content).unwrap();
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();
        sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();

        // same bytes written again bumps mtime only
        fs::write(tmp.path().join("GEN.source"), &content).unwrap();
        let report = sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        assert_eq!(report.synced_files, 0);
    }

    #[test]
    fn test_force_resyncs_everything() {
        let tmp = tempfile::tempdir().unwrap();
        write_notebook(tmp.path(), "GEN.source", &[("GEN 1:1", "In the beginning")]);
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();
        sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();

        let options = SyncOptions {
            force: true,
            ..SyncOptions::default()
        };
        let report = sync_files(&mut db, &provider, &options).unwrap();
        assert_eq!(report.synced_files, 1);
        assert_eq!(report.details.values().next().unwrap().reason, SyncReason::Forced);
    }

    #[test]
    fn test_bad_file_does_not_abort_batch() {
        let tmp = tempfile::tempdir().unwrap();
        write_notebook(tmp.path(), "GEN.source", &[("GEN 1:1", "In the beginning")]);
        fs::write(tmp.path().join("BAD.source"), "{ not json").unwrap();
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();

        let report = sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        assert_eq!(report.synced_files, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].path.ends_with("BAD.source"));

        let stats = db.content_stats().unwrap();
        assert_eq!(stats.total_cells, 1);
        assert!(store::get_file(db.connection().unwrap(), &report.errors[0].path)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_removed_cells_and_stale_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        write_notebook(
            tmp.path(),
            "GEN.source",
            &[("GEN 1:1", "In the beginning"), ("GEN 1:2", "And the earth")],
        );
        let exo = write_notebook(tmp.path(), "EXO.source", &[("EXO 1:1", "Now these")]);
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();
        sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        assert_eq!(db.content_stats().unwrap().total_cells, 3);

        write_notebook(tmp.path(), "GEN.source", &[("GEN 1:1", "In the beginning")]);
        fs::remove_file(&exo).unwrap();

        let report = sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        assert_eq!(report.removed_metadata, 1);
        assert_eq!(report.removed_files, 1);
        assert!(store::get_sync_metadata(db.connection().unwrap(), &exo)
            .unwrap()
            .is_none());
        // GEN 1:2 left its file and EXO is gone entirely
        let stats = db.content_stats().unwrap();
        assert_eq!(stats.total_cells, 1);
        assert_eq!(stats.total_files, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_listing_keeps_indexed_files() {
        let tmp = tempfile::tempdir().unwrap();
        let books = tmp.path().join("books");
        fs::create_dir_all(&books).unwrap();
        write_notebook(&books, "GEN.source", &[("GEN 1:1", "In the beginning")]);
        write_notebook(tmp.path(), "EXO.source", &[("EXO 1:1", "Now these")]);
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();
        sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();

        std::os::unix::fs::symlink(tmp.path().join("missing"), tmp.path().join("LEV.source"))
            .unwrap();
        let err = sync_files(&mut db, &provider, &SyncOptions::default()).unwrap_err();
        assert!(matches!(err, IndexError::Walk(_)));

        let stats = db.content_stats().unwrap();
        assert_eq!(stats.total_cells, 2);
        assert_eq!(stats.total_files, 2);
    }

    #[test]
    fn test_status_check_over_read_only_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let books = tmp.path().join("books");
        fs::create_dir_all(&books).unwrap();
        let genesis = write_notebook(&books, "GEN.source", &[("GEN 1:1", "In the beginning")]);
        let provider = DirectoryProvider::new(&books);

        let path = tmp.path().join("index.sqlite");
        let mut db = IndexDb::open_or_create(&path, &IndexConfig::default(), None).unwrap();
        sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();
        db.close().unwrap();
        write_notebook(&books, "GEN.source", &[("GEN 1:1", "In the very beginning")]);

        let conn =
            Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap();
        let check = check_sync_status_on(&conn, &provider).unwrap();
        assert_eq!(check.needs_sync, vec![genesis]);
        assert_eq!(check.details.len(), 1);
    }

    #[test]
    fn test_progress_and_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        for book in ["GEN", "EXO", "LEV"] {
            let cell_id = format!("{} 1:1", book);
            write_notebook(tmp.path(), &format!("{}.source", book), &[(cell_id.as_str(), "text")]);
        }
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();

        let cancel = AtomicBool::new(false);
        let seen = Cell::new(0);
        let progress = |p: &SyncProgress| {
            seen.set(p.current);
            if p.current == 2 {
                cancel.store(true, Ordering::Relaxed);
            }
        };
        let options = SyncOptions {
            force: false,
            progress: Some(&progress),
            cancel: Some(&cancel),
        };

        let report = sync_files(&mut db, &provider, &options).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.synced_files, 2);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn test_sync_paths_forces_subset() {
        let tmp = tempfile::tempdir().unwrap();
        let genesis = write_notebook(tmp.path(), "GEN.source", &[("GEN 1:1", "In the beginning")]);
        write_notebook(tmp.path(), "EXO.source", &[("EXO 1:1", "Now these")]);
        let provider = DirectoryProvider::new(tmp.path());
        let mut db = db();
        sync_files(&mut db, &provider, &SyncOptions::default()).unwrap();

        let report = sync_paths(&mut db, &provider, &[genesis.as_str(), "/gone/NUM.source"]).unwrap();
        assert_eq!(report.synced_files, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "/gone/NUM.source");
    }
}
