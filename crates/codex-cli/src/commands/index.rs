//! Index commands - status, sync and rebuild

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use codex_core::IndexConfig;
use codex_db::{DbError, IndexReader};
use codex_indexer::{
    check_sync_status_on, rebuild_index, sync_files, DirectoryProvider, IndexDb, IndexError,
    SyncOptions, SyncProgress, SyncReport,
};

use crate::cli::{Cli, OutputFormat};
use crate::output::{colors, human, json};

/// Open (or create) the project's index store for writing
pub fn open_store(cli: &Cli, config: &IndexConfig) -> Result<IndexDb> {
    let path = cli.db_path()?;
    let db = IndexDb::open_or_create(&path, config, Some(cli.identity()?))
        .with_context(|| format!("Failed to open index at {}", path.display()))?;
    if db.rebuilt_on_open() {
        warn!(path = %path.display(), "Index was recreated on open; a full sync is needed");
    }
    Ok(db)
}

pub fn provider(cli: &Cli) -> Result<DirectoryProvider> {
    Ok(DirectoryProvider::new(cli.project_dir()?))
}

pub fn status(cli: &Cli) -> Result<()> {
    let path = cli.db_path()?;
    let reader = match IndexReader::open(&path) {
        Ok(reader) => reader,
        Err(DbError::NotFound(_)) => {
            match cli.effective_format() {
                OutputFormat::Human => {
                    println!("{}", colors::error("Index not found"));
                    println!();
                    println!("Run: codex-index sync");
                }
                OutputFormat::Json => {
                    let output = serde_json::json!({
                        "status": "not_found",
                        "dbPath": path.to_string_lossy(),
                    });
                    println!("{}", json::format(&output, cli.pretty));
                }
                OutputFormat::Minimal => eprintln!("not found"),
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let check = check_sync_status_on(reader.connection(), &provider(cli)?)?;

    match cli.effective_format() {
        OutputFormat::Human => {
            println!("{}", colors::header("Sync Status"));
            println!();
            println!("{}", human::format_sync_check(&check));
            println!();
            if check.needs_sync.is_empty() && check.errors.is_empty() {
                println!("{}", colors::success("Index is up to date"));
            } else {
                println!("Run: codex-index sync");
            }
        }
        OutputFormat::Json => println!("{}", json::format(&check, cli.pretty)),
        OutputFormat::Minimal => {
            for path in &check.needs_sync {
                println!("{}", path);
            }
        }
    }

    Ok(())
}

pub fn sync(cli: &Cli, force: bool) -> Result<()> {
    let config = cli.load_config()?;
    let mut db = open_store(cli, &config)?;
    let provider = provider(cli)?;
    let force = force || db.rebuilt_on_open();
    let show_progress =
        cli.effective_format() == OutputFormat::Human && atty::is(atty::Stream::Stderr);

    let report = run_cancellable(move |cancel| {
        let progress = |p: &SyncProgress| {
            if show_progress {
                eprint!("\r[{}/{}] {}\x1b[K", p.current, p.total, p.path);
            }
        };
        let options = SyncOptions {
            force,
            progress: Some(&progress),
            cancel: Some(cancel),
        };
        let report = sync_files(&mut db, &provider, &options);
        if show_progress {
            eprintln!();
        }
        db.close()?;
        report
    })?;

    print_report(cli, "Sync", &report);
    Ok(())
}

pub fn rebuild(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let mut db = open_store(cli, &config)?;
    let report = rebuild_index(&mut db, &provider(cli)?).context("Rebuild failed")?;
    db.close()?;

    print_report(cli, "Rebuild", &report);
    Ok(())
}

fn print_report(cli: &Cli, title: &str, report: &SyncReport) {
    match cli.effective_format() {
        OutputFormat::Human => {
            println!("{}", colors::header(title));
            println!();
            println!("{}", human::format_sync_report(report));
        }
        OutputFormat::Json => println!("{}", json::format(report, cli.pretty)),
        OutputFormat::Minimal => println!(
            "{} {} {}",
            report.synced_files,
            report.unchanged_files,
            report.errors.len()
        ),
    }
}

/// Run blocking index work on a worker thread; Ctrl+C raises the cancel
/// flag and waits for the work to stop between files
fn run_cancellable<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AtomicBool) -> Result<T, IndexError> + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let flag = Arc::clone(&cancel);
        let mut task = tokio::task::spawn_blocking(move || work(&flag));
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping after the current file");
                cancel.store(true, Ordering::SeqCst);
                task.await
            }
        };
        let result = joined.context("Index worker failed")?;
        Ok(result?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(project: &std::path::Path) -> Cli {
        let project = project.to_string_lossy().into_owned();
        Cli::parse_from([
            "codex-index", "--project", project.as_str(), "--format", "json", "status",
        ])
    }

    #[test]
    fn test_status_leaves_missing_index_alone() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("GEN.source"), r#"{"cells": []}"#).unwrap();
        let cli = cli(tmp.path());

        status(&cli).unwrap();
        assert!(!cli.db_path().unwrap().exists());
    }

    #[test]
    fn test_status_reads_existing_index() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("GEN.source"), r#"{"cells": []}"#).unwrap();
        let cli = cli(tmp.path());
        let config = IndexConfig::default();
        let mut db = IndexDb::open_or_create(&cli.db_path().unwrap(), &config, None).unwrap();
        sync_files(&mut db, &provider(&cli).unwrap(), &SyncOptions::default()).unwrap();
        db.close().unwrap();

        status(&cli).unwrap();
    }
}
