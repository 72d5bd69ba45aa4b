//! Doctor command - diagnose the index and project

use anyhow::Result;

use codex_core::SCHEMA_VERSION;
use codex_db::IndexReader;
use codex_indexer::{fts, FileProvider};

use crate::cli::{Cli, OutputFormat};
use crate::commands::index::provider;
use crate::output::{colors, json};

pub fn run(cli: &Cli) -> Result<()> {
    let mut checks: Vec<Check> = Vec::new();

    // Check 1: Configuration
    let config = cli.load_config();
    checks.push(match &config {
        Ok(_) => Check::pass(
            "Configuration",
            match cli.config_path()? {
                Some(path) => format!("Loaded from {}", path.display()),
                None => "Using defaults".to_string(),
            },
        ),
        Err(e) => Check::fail("Configuration", format!("{:#}", e)),
    });

    // Check 2: Project files
    let project_dir = cli.project_dir()?;
    match provider(cli)?.list_files() {
        Ok(files) if !files.is_empty() => checks.push(Check::pass(
            "Project files",
            format!("{} notebooks under {}", files.len(), project_dir.display()),
        )),
        Ok(_) => checks.push(Check::fail(
            "Project files",
            format!("No .source or .codex files under {}", project_dir.display()),
        )),
        Err(e) => checks.push(Check::fail("Project files", e.to_string())),
    }

    // Check 3: Database file exists
    let db_path = cli.db_path()?;
    let db_exists = db_path.exists();
    checks.push(Check {
        name: "Database file".to_string(),
        passed: db_exists,
        details: if db_exists {
            format!("Found at {}", db_path.display())
        } else {
            format!("Not found at {}", db_path.display())
        },
    });

    // Check 4: Database opens with the expected schema
    let reader = if db_exists {
        match IndexReader::open(&db_path) {
            Ok(reader) => {
                checks.push(Check::pass(
                    "Schema version",
                    format!("v{}", SCHEMA_VERSION),
                ));
                Some(reader)
            }
            Err(e) => {
                checks.push(Check::fail("Schema version", e.to_string()));
                None
            }
        }
    } else {
        None
    };

    if let Some(reader) = &reader {
        // Check 5: FTS table matches the cells
        match fts::check_parity(reader.connection()) {
            Ok(parity) if parity.is_consistent() => {
                checks.push(Check::pass("Search index", "In step with cells"))
            }
            Ok(parity) => checks.push(Check::fail(
                "Search index",
                format!(
                    "{} missing, {} duplicate, {} stale, {} orphaned rows",
                    parity.missing, parity.duplicates, parity.stale, parity.orphans
                ),
            )),
            Err(e) => checks.push(Check::fail("Search index", e.to_string())),
        }

        // Check 6: Has data
        match reader.content_stats() {
            Ok(stats) if stats.total_cells > 0 => checks.push(Check::pass(
                "Has data",
                format!("{} cells in {} files", stats.total_cells, stats.total_files),
            )),
            Ok(_) => checks.push(Check::fail("Has data", "Index is empty")),
            Err(e) => checks.push(Check::fail("Has data", format!("Query failed: {}", e))),
        }
    }

    let all_passed = checks.iter().all(|c| c.passed);

    match cli.effective_format() {
        OutputFormat::Human => {
            println!("{}", colors::header("Codex Index Doctor"));
            println!();

            for check in &checks {
                let status = if check.passed {
                    colors::success(&check.name)
                } else {
                    colors::error(&check.name)
                };
                println!("  {} - {}", status, check.details);
            }

            println!();
            if all_passed {
                println!("{}", colors::success("All checks passed"));
            } else {
                println!("{}", colors::error("Some checks failed"));
                println!();
                println!("To fix:");
                if !db_exists {
                    println!("  1. Run: codex-index sync");
                } else if reader.is_none() {
                    println!("  1. Run: codex-index rebuild");
                } else {
                    println!("  1. Run: codex-index validate integrity");
                }
            }
        }

        OutputFormat::Json => {
            let output = serde_json::json!({
                "checks": checks.iter().map(|c| serde_json::json!({
                    "name": c.name,
                    "passed": c.passed,
                    "details": c.details
                })).collect::<Vec<_>>(),
                "allPassed": all_passed
            });
            println!("{}", json::format(&output, cli.pretty));
        }

        OutputFormat::Minimal => {
            let failed: Vec<_> = checks.iter().filter(|c| !c.passed).collect();
            if failed.is_empty() {
                println!("ok");
            } else {
                for c in failed {
                    println!("FAIL: {}", c.name);
                }
            }
        }
    }

    Ok(())
}

struct Check {
    name: String,
    passed: bool,
    details: String,
}

impl Check {
    fn pass(name: &str, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            details: details.into(),
        }
    }

    fn fail(name: &str, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            details: details.into(),
        }
    }
}
