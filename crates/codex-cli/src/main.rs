//! codex-cli - CLI for syncing, searching and validating the codex content index

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Status => commands::index::status(&cli),
        Command::Sync { force } => commands::index::sync(&cli, *force),
        Command::Rebuild => commands::index::rebuild(&cli),
        Command::Validate { tier } => commands::validate::run(&cli, (*tier).into()),
        Command::Watch => commands::validate::watch(&cli),
        Command::Stats => commands::stats::run(&cli),
        Command::Search {
            query,
            limit,
            side,
            raw,
        } => commands::search::run(&cli, query, *limit, side.map(Into::into), *raw),
        Command::Doctor => commands::doctor::run(&cli),
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the default level
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
