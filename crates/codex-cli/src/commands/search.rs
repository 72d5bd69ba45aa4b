//! Search command - full-text search across cell content

use anyhow::{Context, Result};
use colored::Colorize;

use codex_core::ContentSide;
use codex_db::{IndexReader, SearchOptions};

use crate::cli::{Cli, OutputFormat};
use crate::output::{colors, human, json};

pub fn run(
    cli: &Cli,
    query: &str,
    limit: i64,
    side: Option<ContentSide>,
    raw: bool,
) -> Result<()> {
    let path = cli.db_path()?;
    let reader = IndexReader::open(&path)
        .with_context(|| format!("Failed to open index at {}", path.display()))?;

    let options = SearchOptions {
        limit,
        content_type: side,
        raw,
    };
    let hits = reader.search(query, &options)?;

    match cli.effective_format() {
        OutputFormat::Human => {
            if hits.is_empty() {
                println!("No results found for: {}", query.cyan());
            } else {
                println!(
                    "{}",
                    colors::header(&format!("Search results for '{}' ({})", query, hits.len()))
                );
                println!();

                for hit in &hits {
                    println!("{}", human::format_hit(hit));
                }
            }
        }

        OutputFormat::Json => println!("{}", json::format(&hits, cli.pretty)),

        OutputFormat::Minimal => {
            for hit in &hits {
                println!("{}", hit.cell_id);
            }
        }
    }

    Ok(())
}
