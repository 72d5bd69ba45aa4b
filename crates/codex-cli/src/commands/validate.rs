//! Validate and watch commands - run the integrity validator

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

use codex_core::IndexConfig;
use codex_indexer::{
    sync_files, BackgroundValidator, Escalation, SharedDb, SyncOptions, ValidationObserver,
    ValidationReport, ValidationTier, ValidatorDeps,
};

use crate::cli::{Cli, OutputFormat};
use crate::commands::index::{open_store, provider};
use crate::output::{colors, human, json};

/// Prints every finished report to stdout
struct ConsoleObserver {
    format: OutputFormat,
    pretty: bool,
}

impl ValidationObserver for ConsoleObserver {
    fn on_report(&self, report: &ValidationReport, escalation: Escalation) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "{} {}",
                    colors::label(&report.started_at.format("%H:%M:%S").to_string()),
                    colors::header(&format!("{} check", report.tier))
                );
                for issue in &report.issues {
                    println!("{}", human::format_issue(issue));
                }
                println!("  {}", colors::colored_escalation(escalation));
            }
            OutputFormat::Json => println!("{}", json::format(report, self.pretty)),
            OutputFormat::Minimal => println!(
                "{} {} {}",
                report.tier,
                escalation_name(escalation),
                report.issues.len()
            ),
        }
    }
}

fn escalation_name(escalation: Escalation) -> &'static str {
    match escalation {
        Escalation::None => "ok",
        Escalation::Informational => "repaired",
        Escalation::OfferResync => "resync",
        Escalation::OfferRebuild => "rebuild",
    }
}

fn validator(
    cli: &Cli,
    config: &IndexConfig,
    observer: Option<Arc<dyn ValidationObserver>>,
) -> Result<(BackgroundValidator, SharedDb)> {
    let mut db = open_store(cli, config)?;
    let provider = Arc::new(provider(cli)?);

    if db.rebuilt_on_open() {
        let options = SyncOptions {
            force: true,
            ..SyncOptions::default()
        };
        sync_files(&mut db, provider.as_ref(), &options).context("Initial sync failed")?;
    }

    let db: SharedDb = Arc::new(Mutex::new(db));
    let mut deps = ValidatorDeps::new(Arc::clone(&db), provider);
    if let Some(observer) = observer {
        deps = deps.with_observer(observer);
    }
    let mut validator = BackgroundValidator::new(config.clone());
    validator.initialize(deps);
    Ok((validator, db))
}

fn close(db: &SharedDb) -> Result<()> {
    let mut db = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    db.close()?;
    Ok(())
}

pub fn run(cli: &Cli, tier: ValidationTier) -> Result<()> {
    let config = cli.load_config()?;
    let (validator, db) = validator(cli, &config, None)?;
    let report = validator.force_validation(tier)?;
    drop(validator);
    close(&db)?;

    match cli.effective_format() {
        OutputFormat::Human => println!("{}", human::format_validation_report(&report)),
        OutputFormat::Json => println!("{}", json::format(&report, cli.pretty)),
        OutputFormat::Minimal => println!(
            "{} {}",
            escalation_name(report.escalation()),
            report.issues.len()
        ),
    }

    Ok(())
}

pub fn watch(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let format = cli.effective_format();
    let observer: Arc<dyn ValidationObserver> = Arc::new(ConsoleObserver {
        format,
        pretty: cli.pretty,
    });
    let (mut validator, db) = validator(cli, &config, Some(observer))?;
    validator.start()?;

    if format == OutputFormat::Human {
        println!(
            "{}",
            colors::header(&format!(
                "Validating every {}s (quick) / {}s (integrity)",
                config.quick_check_interval().as_secs(),
                config.integrity_check_interval().as_secs()
            ))
        );
        println!("--- Watching (Ctrl+C to stop) ---");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl+C")?;

    validator.stop();
    if format == OutputFormat::Json {
        println!("{}", json::format(&validator.validation_status(), cli.pretty));
    }
    close(&db)?;
    Ok(())
}
