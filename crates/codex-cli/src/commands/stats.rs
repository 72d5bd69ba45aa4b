//! Stats command - sync and content statistics

use anyhow::Result;
use codex_db::{DbError, IndexReader};

use crate::cli::{Cli, OutputFormat};
use crate::output::{colors, json};

pub fn run(cli: &Cli) -> Result<()> {
    let path = cli.db_path()?;
    let reader = match IndexReader::open(&path) {
        Ok(reader) => reader,
        Err(DbError::NotFound(_)) => {
            match cli.effective_format() {
                OutputFormat::Human => {
                    println!("{}", colors::error("Index not found"));
                    println!();
                    println!("Create it with:");
                    println!("  codex-index sync");
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

    let sync = reader.sync_statistics()?;
    let content = reader.content_stats()?;

    match cli.effective_format() {
        OutputFormat::Human => {
            println!("{}", colors::header("Index Statistics"));
            println!();
            println!("  {}: {}", colors::label("Database"), sync.db_path.display());
            println!(
                "  {}: {}",
                colors::label("Size"),
                colors::format_size(sync.db_size_bytes)
            );
            println!(
                "  {}: {}",
                colors::label("Schema version"),
                colors::value(&sync.schema_version.to_string())
            );
            println!();
            println!(
                "  {}: {} ({} source, {} codex)",
                colors::label("Tracked files"),
                colors::format_count(sync.total_files),
                colors::format_count(sync.source_files),
                colors::format_count(sync.codex_files)
            );
            println!(
                "  {}: {}",
                colors::label("Tracked bytes"),
                colors::format_size(sync.total_bytes)
            );
            println!(
                "  {}: {}",
                colors::label("With commit hash"),
                colors::format_count(sync.files_with_commit_hash)
            );
            println!(
                "  {}: {}",
                colors::label("Cells"),
                colors::format_count(content.total_cells)
            );
            println!(
                "  {}: {}",
                colors::label("Words"),
                colors::format_count(content.total_words)
            );

            if let Some(last) = &sync.last_synced_at {
                println!();
                println!(
                    "  {}: {}",
                    colors::label("Last synced"),
                    colors::value(&last.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                );
            }
        }

        OutputFormat::Json => {
            let output = serde_json::json!({
                "sync": sync,
                "content": content,
            });
            println!("{}", json::format(&output, cli.pretty));
        }

        OutputFormat::Minimal => {
            println!(
                "{} {} {}",
                sync.total_files, content.total_cells, content.total_words
            );
        }
    }

    Ok(())
}
