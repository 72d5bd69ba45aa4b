//! CLI argument definitions

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use codex_core::{ContentSide, IndexConfig};
use codex_indexer::{ProjectIdentity, ValidationTier};

/// File the project-local configuration is read from
const PROJECT_CONFIG_FILE: &str = "index-config.json";

/// CLI for the codex content index
#[derive(Parser, Debug)]
#[command(name = "codex-index")]
#[command(author = "Codex Editor Contributors")]
#[command(version)]
#[command(about = "Sync, search and validate the codex content index")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory containing .source / .codex notebooks
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Custom database path
    #[arg(long, global = true, env = "CODEX_INDEX_DB")]
    pub db_path: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(long, global = true, env = "CODEX_INDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (auto-detects based on TTY if not specified)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Output JSON (alias for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON with indentation
    #[arg(long, short = 'p', global = true)]
    pub pretty: bool,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format for commands
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output with colors
    Human,
    /// JSON output
    Json,
    /// Minimal text output
    Minimal,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SideArg {
    Source,
    Target,
}

impl From<SideArg> for ContentSide {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Source => ContentSide::Source,
            SideArg::Target => ContentSide::Target,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum TierArg {
    /// Connectivity and change-rate checks
    Quick,
    /// Re-hash every tracked file and repair drift
    Integrity,
}

impl From<TierArg> for ValidationTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Quick => ValidationTier::Quick,
            TierArg::Integrity => ValidationTier::Integrity,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show which files need syncing
    Status,

    /// Sync changed files into the index
    Sync {
        /// Resync every file regardless of hash
        #[arg(long)]
        force: bool,
    },

    /// Show sync and content statistics
    Stats,

    /// Search cell content using full-text search
    Search {
        /// Search query
        query: String,

        /// Limit results
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,

        /// Only search one side of the cells
        #[arg(long)]
        side: Option<SideArg>,

        /// Treat the query as a raw FTS5 expression
        #[arg(long)]
        raw: bool,
    },

    /// Run one validation tier now
    Validate {
        #[arg(value_enum, default_value = "quick")]
        tier: TierArg,
    },

    /// Run the background validator until Ctrl+C
    Watch,

    /// Drop the index and rebuild it from the project files
    Rebuild,

    /// Diagnose the index and project
    Doctor,
}

impl Cli {
    /// Get the effective output format
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            return OutputFormat::Json;
        }
        if let Some(f) = self.format {
            return f;
        }
        if atty::is(atty::Stream::Stdout) {
            OutputFormat::Human
        } else {
            OutputFormat::Json
        }
    }

    /// Project directory, defaulting to the working directory
    pub fn project_dir(&self) -> Result<PathBuf> {
        match &self.project {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Could not determine working directory"),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(codex_indexer::default_db_path(&self.project_dir()?)),
        }
    }

    /// Config file actually used, if any: `--config`, then the project's
    /// `.project/index-config.json`, then the user config directory
    pub fn config_path(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.config {
            return Ok(Some(path.clone()));
        }
        let project = self
            .project_dir()?
            .join(".project")
            .join(PROJECT_CONFIG_FILE);
        if project.exists() {
            return Ok(Some(project));
        }
        Ok(dirs::config_dir()
            .map(|dir| dir.join("codex-index").join("config.json"))
            .filter(|path| path.exists()))
    }

    pub fn load_config(&self) -> Result<IndexConfig> {
        let path = self.config_path()?;
        IndexConfig::load_or_default(path.as_deref()).with_context(|| match &path {
            Some(p) => format!("Failed to load config from {}", p.display()),
            None => "Invalid default configuration".to_string(),
        })
    }

    /// Owner recorded in the store: the canonical project path
    pub fn identity(&self) -> Result<ProjectIdentity> {
        let dir = self.project_dir()?;
        let canonical = dir.canonicalize().unwrap_or(dir);
        let identity = ProjectIdentity::new(canonical.to_string_lossy());
        Ok(match project_name(&canonical) {
            Some(name) => identity.with_name(name),
            None => identity,
        })
    }
}

fn project_name(dir: &Path) -> Option<String> {
    dir.file_name().map(|n| n.to_string_lossy().into_owned())
}
