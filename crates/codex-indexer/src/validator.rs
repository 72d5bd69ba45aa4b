//! Background validation of the index against the files it was built from
//!
//! Two tiers run on a polling thread. The quick tier checks that the store
//! answers and that the change rate looks plausible, using provider stats
//! only. The integrity tier re-hashes every tracked file, repairs drift by
//! re-syncing the file, and looks for orphaned or dangling records.
//!
//! A run never fails as a whole: errors become issues on the report and the
//! polling loop carries on.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use codex_core::{content_hash, FileEntry, IndexConfig};

use crate::connection::{IndexDb, IndexError, SharedDb};
use crate::fts;
use crate::provider::FileProvider;
use crate::store;
use crate::sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationTier {
    Quick,
    Integrity,
}

impl ValidationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationTier::Quick => "quick",
            ValidationTier::Integrity => "integrity",
        }
    }
}

impl std::str::FromStr for ValidationTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(ValidationTier::Quick),
            "integrity" => Ok(ValidationTier::Integrity),
            other => Err(format!("unknown validation tier: {}", other)),
        }
    }
}

impl std::fmt::Display for ValidationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Connectivity,
    EmptyIndex,
    HighChangeRate,
    HashMismatch,
    EarlyTermination,
    OrphanedSyncMetadata,
    DanglingFileReference,
    FtsParity,
    UnreadableFile,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Connectivity => "connectivity",
            IssueKind::EmptyIndex => "empty_index",
            IssueKind::HighChangeRate => "high_change_rate",
            IssueKind::HashMismatch => "hash_mismatch",
            IssueKind::EarlyTermination => "early_termination",
            IssueKind::OrphanedSyncMetadata => "orphaned_sync_metadata",
            IssueKind::DanglingFileReference => "dangling_file_reference",
            IssueKind::FtsParity => "fts_parity",
            IssueKind::UnreadableFile => "unreadable_file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Auto-repair was attempted and succeeded
    pub repaired: bool,
}

impl ValidationIssue {
    fn new(kind: IssueKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            path: None,
            repaired: false,
        }
    }

    fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// What the host should offer the user after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    None,
    /// Everything found was repaired
    Informational,
    /// Unrepaired errors remain; a full sync should fix them
    OfferResync,
    /// Store unreadable or mass corruption
    OfferRebuild,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub tier: ValidationTier,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub files_checked: usize,
    pub issues: Vec<ValidationIssue>,
    /// The integrity pass stopped at the mismatch threshold
    pub early_terminated: bool,
    /// Verification is disabled by configuration
    pub skipped: bool,
}

impl ValidationReport {
    fn new(tier: ValidationTier) -> Self {
        Self {
            tier,
            started_at: Utc::now(),
            duration_ms: 0,
            files_checked: 0,
            issues: Vec::new(),
            early_terminated: false,
            skipped: false,
        }
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    pub fn escalation(&self) -> Escalation {
        if self.issues.iter().any(|i| i.severity == Severity::Critical) {
            Escalation::OfferRebuild
        } else if self
            .issues
            .iter()
            .any(|i| i.severity == Severity::Error && !i.repaired)
        {
            Escalation::OfferResync
        } else if !self.issues.is_empty() {
            Escalation::Informational
        } else {
            Escalation::None
        }
    }

    fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }
}

/// Receives every finished report
pub trait ValidationObserver: Send + Sync {
    fn on_report(&self, report: &ValidationReport, escalation: Escalation);
}

/// Observer that writes escalations to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ValidationObserver for LoggingObserver {
    fn on_report(&self, report: &ValidationReport, escalation: Escalation) {
        let tier = report.tier.as_str();
        let issues = report.issues.len();
        match escalation {
            Escalation::OfferRebuild => {
                error!(tier, issues, "Index validation found critical issues; a full rebuild is recommended")
            }
            Escalation::OfferResync => {
                warn!(tier, issues, "Index validation found unrepaired errors; a full sync is recommended")
            }
            Escalation::Informational => info!(tier, issues, "Index validation repaired all issues"),
            Escalation::None => debug!(tier, "Index validation passed"),
        }
    }
}

/// Everything a validator needs from its host
#[derive(Clone)]
pub struct ValidatorDeps {
    pub db: SharedDb,
    pub provider: Arc<dyn FileProvider>,
    pub observer: Arc<dyn ValidationObserver>,
}

impl ValidatorDeps {
    pub fn new(db: SharedDb, provider: Arc<dyn FileProvider>) -> Self {
        Self {
            db,
            provider,
            observer: Arc::new(LoggingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ValidationObserver>) -> Self {
        self.observer = observer;
        self
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Pending queue and per-tier timing
#[derive(Debug)]
pub struct Scheduler {
    quick_interval: Duration,
    integrity_interval: Duration,
    suppression_window: Duration,
    max_jitter: Duration,
    pending: VecDeque<ValidationTier>,
    last_run: HashMap<ValidationTier, Instant>,
    next_due: HashMap<ValidationTier, Instant>,
}

impl Scheduler {
    /// The first quick check is due immediately, the first integrity check
    /// one interval from `now`
    pub fn new(config: &IndexConfig, now: Instant) -> Self {
        let mut next_due = HashMap::new();
        next_due.insert(ValidationTier::Quick, now);
        next_due.insert(
            ValidationTier::Integrity,
            now + config.integrity_check_interval(),
        );
        Self {
            quick_interval: config.quick_check_interval(),
            integrity_interval: config.integrity_check_interval(),
            suppression_window: config.quick_suppression_window(),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
            pending: VecDeque::new(),
            last_run: HashMap::new(),
            next_due,
        }
    }

    fn interval(&self, tier: ValidationTier) -> Duration {
        match tier {
            ValidationTier::Quick => self.quick_interval,
            ValidationTier::Integrity => self.integrity_interval,
        }
    }

    /// Queue a run. Returns false if it was deduplicated or suppressed.
    ///
    /// A quick check is suppressed while an integrity check is pending or
    /// if one finished within the suppression window. Queueing an integrity
    /// check drops a pending quick one.
    pub fn request(&mut self, tier: ValidationTier, now: Instant) -> bool {
        if self.pending.contains(&tier) {
            return false;
        }
        match tier {
            ValidationTier::Quick => {
                if self.pending.contains(&ValidationTier::Integrity) {
                    return false;
                }
                if let Some(last) = self.last_run.get(&ValidationTier::Integrity) {
                    if now.saturating_duration_since(*last) < self.suppression_window {
                        return false;
                    }
                }
            }
            ValidationTier::Integrity => {
                self.pending.retain(|t| *t != ValidationTier::Quick);
            }
        }
        self.pending.push_back(tier);
        true
    }

    /// Queue whatever is due and hand out at most one request
    pub fn poll(&mut self, now: Instant) -> Option<ValidationTier> {
        for tier in [ValidationTier::Integrity, ValidationTier::Quick] {
            let due = self.next_due.get(&tier).map(|d| *d <= now).unwrap_or(true);
            if due {
                if !self.request(tier, now) {
                    debug!(tier = tier.as_str(), "Scheduled validation suppressed");
                }
                // placeholder until the run records its own schedule
                self.next_due.insert(tier, now + self.interval(tier));
            }
        }
        self.pending.pop_front()
    }

    /// Note a finished run and schedule the next one at interval plus jitter
    pub fn record_run(&mut self, tier: ValidationTier, finished: Instant) {
        let jitter = self.jitter();
        self.last_run.insert(tier, finished);
        self.next_due
            .insert(tier, finished + self.interval(tier) + jitter);
        self.pending.retain(|t| *t != tier);
        if tier == ValidationTier::Integrity {
            self.pending.retain(|t| *t != ValidationTier::Quick);
        }
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    pub fn pending(&self) -> Vec<ValidationTier> {
        self.pending.iter().copied().collect()
    }

    pub fn last_run(&self, tier: ValidationTier) -> Option<Instant> {
        self.last_run.get(&tier).copied()
    }

    pub fn next_due(&self, tier: ValidationTier) -> Option<Instant> {
        self.next_due.get(&tier).copied()
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

struct Runner {
    config: IndexConfig,
    deps: ValidatorDeps,
}

impl Runner {
    fn db(&self) -> MutexGuard<'_, IndexDb> {
        self.deps.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(&self, tier: ValidationTier) -> ValidationReport {
        let started = Instant::now();
        let mut report = ValidationReport::new(tier);
        let result = match tier {
            ValidationTier::Quick => self.quick(&mut report),
            ValidationTier::Integrity => self.integrity(&mut report),
        };
        if let Err(e) = result {
            error!(tier = tier.as_str(), error = %e, "Validation run failed");
            report.push(ValidationIssue::new(
                IssueKind::Connectivity,
                Severity::Critical,
                format!("validation aborted: {}", e),
            ));
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            tier = tier.as_str(),
            issues = report.issues.len(),
            files = report.files_checked,
            duration_ms = report.duration_ms,
            "Validation finished"
        );
        report
    }

    /// Total cell count, or a critical issue if the store does not answer
    fn check_connectivity(&self, report: &mut ValidationReport) -> Option<i64> {
        let db = self.db();
        let result = db.connection().and_then(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cells", [], |row| row.get::<_, i64>(0))
                .map_err(IndexError::from)
        });
        match result {
            Ok(count) => Some(count),
            Err(e) => {
                report.push(ValidationIssue::new(
                    IssueKind::Connectivity,
                    Severity::Critical,
                    format!("index store unreadable: {}", e),
                ));
                None
            }
        }
    }

    fn list_files(&self, report: &mut ValidationReport) -> Option<Vec<FileEntry>> {
        match self.deps.provider.list_files() {
            Ok(entries) => Some(entries),
            Err(e) => {
                report.push(ValidationIssue::new(
                    IssueKind::Connectivity,
                    Severity::Error,
                    format!("file provider unavailable: {}", e),
                ));
                None
            }
        }
    }

    fn quick(&self, report: &mut ValidationReport) -> Result<(), IndexError> {
        let Some(cells) = self.check_connectivity(report) else {
            return Ok(());
        };
        let Some(entries) = self.list_files(report) else {
            return Ok(());
        };

        if cells == 0 {
            if !entries.is_empty() {
                report.push(ValidationIssue::new(
                    IssueKind::EmptyIndex,
                    Severity::Error,
                    format!("index has no cells but {} files are present", entries.len()),
                ));
            }
            return Ok(());
        }

        let records: HashMap<String, store::SyncMetadata> = {
            let db = self.db();
            store::all_sync_metadata(db.connection()?)?
                .into_iter()
                .map(|r| (r.path.clone(), r))
                .collect()
        };

        let changed = entries
            .iter()
            .filter(|entry| match records.get(&entry.path) {
                None => true,
                Some(record) => match self.deps.provider.stat(&entry.path) {
                    Ok(stat) => !sync::stat_matches(record, &stat),
                    Err(_) => true,
                },
            })
            .count();
        report.files_checked = entries.len();

        if !entries.is_empty() {
            let ratio = changed as f64 / entries.len() as f64;
            if ratio > self.config.changed_file_ratio_threshold {
                report.push(ValidationIssue::new(
                    IssueKind::HighChangeRate,
                    Severity::Warning,
                    format!(
                        "{} of {} files changed since last sync ({:.0}%)",
                        changed,
                        entries.len(),
                        ratio * 100.0
                    ),
                ));
            }
        }
        Ok(())
    }

    fn integrity(&self, report: &mut ValidationReport) -> Result<(), IndexError> {
        if self.config.skip_sync_verification {
            info!("Sync verification disabled, skipping integrity check");
            report.skipped = true;
            return Ok(());
        }
        if self.check_connectivity(report).is_none() {
            return Ok(());
        }
        let Some(entries) = self.list_files(report) else {
            return Ok(());
        };

        let records = {
            let db = self.db();
            store::all_sync_metadata(db.connection()?)?
        };
        let provided: HashMap<&str, &FileEntry> =
            entries.iter().map(|e| (e.path.as_str(), e)).collect();

        let threshold = self.config.hash_mismatch_early_termination_threshold;
        let mut mismatches = 0usize;
        let mut orphaned = Vec::new();

        for record in &records {
            let Some(entry) = provided.get(record.path.as_str()) else {
                orphaned.push(record.path.clone());
                continue;
            };
            report.files_checked += 1;

            let bytes = match self.deps.provider.read_bytes(&entry.path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "Could not read file for verification");
                    report.push(
                        ValidationIssue::new(
                            IssueKind::UnreadableFile,
                            Severity::Error,
                            format!("tracked file could not be read: {}", e),
                        )
                        .with_path(&record.path),
                    );
                    continue;
                }
            };
            let actual = content_hash(&bytes);
            if actual == record.content_hash {
                continue;
            }

            mismatches += 1;
            if mismatches > threshold {
                if !report.early_terminated {
                    report.early_terminated = true;
                    report.push(ValidationIssue::new(
                        IssueKind::EarlyTermination,
                        Severity::Critical,
                        format!(
                            "more than {} files differ from the index; stopped checking",
                            threshold
                        ),
                    ));
                    warn!(threshold, "Mass hash mismatch, terminating integrity check early");
                }
                if !self.config.repair_after_early_termination {
                    break;
                }
                self.repair(entry, bytes);
                continue;
            }

            let repaired = self.repair(entry, bytes);
            let mut issue = ValidationIssue::new(
                IssueKind::HashMismatch,
                Severity::Error,
                format!(
                    "content hash differs from index (stored {}, actual {})",
                    short_hash(&record.content_hash),
                    short_hash(&actual)
                ),
            )
            .with_path(&record.path);
            issue.repaired = repaired;
            report.push(issue);
        }

        if report.early_terminated {
            return Ok(());
        }

        for path in orphaned {
            report.push(
                ValidationIssue::new(
                    IssueKind::OrphanedSyncMetadata,
                    Severity::Error,
                    "sync metadata for a file that no longer exists",
                )
                .with_path(path),
            );
        }

        let dangling: i64 = {
            let db = self.db();
            db.connection()?.query_row(
                "SELECT COUNT(*) FROM cells
                 WHERE (s_file_id IS NOT NULL AND s_file_id NOT IN (SELECT id FROM files))
                    OR (t_file_id IS NOT NULL AND t_file_id NOT IN (SELECT id FROM files))
                    OR (s_content IS NOT NULL AND s_file_id IS NULL)
                    OR (t_content IS NOT NULL AND t_file_id IS NULL)",
                [],
                |row| row.get(0),
            )?
        };
        if dangling > 0 {
            report.push(ValidationIssue::new(
                IssueKind::DanglingFileReference,
                Severity::Error,
                format!("{} cells reference a missing file", dangling),
            ));
        }

        let parity = {
            let db = self.db();
            fts::check_parity(db.connection()?)?
        };
        if !parity.is_consistent() {
            let mut issue = ValidationIssue::new(
                IssueKind::FtsParity,
                Severity::Warning,
                format!(
                    "search index out of step: {} missing, {} duplicate, {} stale, {} orphaned",
                    parity.missing, parity.duplicates, parity.stale, parity.orphans
                ),
            );
            issue.repaired = match self.db().repair_fts() {
                Ok(repair) => {
                    info!(?repair, "Repaired search index");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "FTS repair failed");
                    false
                }
            };
            report.push(issue);
        }

        Ok(())
    }

    /// Re-sync one file. Provider reads happen before the store is locked.
    fn repair(&self, entry: &FileEntry, bytes: Vec<u8>) -> bool {
        let known = (content_hash(&bytes), bytes.len() as u64);
        let prepared = match sync::prepare_file(self.deps.provider.as_ref(), entry, Some(known)) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Repair failed reading file");
                return false;
            }
        };

        let mut db = self.db();
        match db.write("validator_repair", |conn| {
            sync::apply_prepared(conn, &prepared, &self.config)
        }) {
            Ok(_) => {
                info!(path = %entry.path, "Repaired drifted file");
                true
            }
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Repair failed");
                false
            }
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub issues: usize,
    pub escalation: Escalation,
    pub early_terminated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStatus {
    pub running: bool,
    pub in_progress: Option<ValidationTier>,
    pub pending: Vec<ValidationTier>,
    pub last_quick: Option<RunSummary>,
    pub last_integrity: Option<RunSummary>,
    pub next_quick_in_ms: Option<u64>,
    pub next_integrity_in_ms: Option<u64>,
}

struct ValidatorState {
    scheduler: Scheduler,
    last_reports: HashMap<ValidationTier, RunSummary>,
    in_progress: Option<ValidationTier>,
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

fn lock_state(state: &Mutex<ValidatorState>) -> MutexGuard<'_, ValidatorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run one tier. `run_lock` is held for the whole run so scheduled and
/// forced runs never overlap.
fn execute(
    runner: &Runner,
    state: &Mutex<ValidatorState>,
    run_lock: &Mutex<()>,
    tier: ValidationTier,
) -> ValidationReport {
    let _running = run_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    lock_state(state).in_progress = Some(tier);

    let report = runner.run(tier);
    let escalation = report.escalation();

    {
        let mut state = lock_state(state);
        state.scheduler.record_run(tier, Instant::now());
        state.last_reports.insert(
            tier,
            RunSummary {
                finished_at: Utc::now(),
                duration_ms: report.duration_ms,
                issues: report.issues.len(),
                escalation,
                early_terminated: report.early_terminated,
            },
        );
        state.in_progress = None;
    }

    runner.deps.observer.on_report(&report, escalation);
    report
}

fn poll_loop(
    runner: Arc<Runner>,
    state: Arc<Mutex<ValidatorState>>,
    run_lock: Arc<Mutex<()>>,
    stop_rx: mpsc::Receiver<()>,
    poll: Duration,
) {
    loop {
        match stop_rx.recv_timeout(poll) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let next = lock_state(&state).scheduler.poll(Instant::now());
        if let Some(tier) = next {
            debug!(tier = tier.as_str(), "Running scheduled validation");
            execute(&runner, &state, &run_lock, tier);
        }
    }
    debug!("Validator loop stopped");
}

/// Periodic two-tier validator.
///
/// Construct with [`BackgroundValidator::new`], hand it its dependencies with
/// [`BackgroundValidator::initialize`], then [`BackgroundValidator::start`].
/// Dropping the validator stops the polling thread.
pub struct BackgroundValidator {
    config: IndexConfig,
    runner: Option<Arc<Runner>>,
    state: Arc<Mutex<ValidatorState>>,
    run_lock: Arc<Mutex<()>>,
    worker: Option<Worker>,
}

impl BackgroundValidator {
    pub fn new(config: IndexConfig) -> Self {
        let scheduler = Scheduler::new(&config, Instant::now());
        Self {
            config,
            runner: None,
            state: Arc::new(Mutex::new(ValidatorState {
                scheduler,
                last_reports: HashMap::new(),
                in_progress: None,
            })),
            run_lock: Arc::new(Mutex::new(())),
            worker: None,
        }
    }

    pub fn initialize(&mut self, deps: ValidatorDeps) {
        self.runner = Some(Arc::new(Runner {
            config: self.config.clone(),
            deps,
        }));
    }

    fn runner(&self) -> Result<Arc<Runner>, IndexError> {
        self.runner
            .clone()
            .ok_or_else(|| IndexError::Config("validator used before initialize".to_string()))
    }

    /// Spawn the polling thread. Starting twice is a no-op.
    pub fn start(&mut self) -> Result<(), IndexError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let runner = self.runner()?;
        let state = Arc::clone(&self.state);
        let run_lock = Arc::clone(&self.run_lock);
        let poll = self.config.validation_poll_interval();
        let (stop_tx, stop_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("index-validator".to_string())
            .spawn(move || poll_loop(runner, state, run_lock, stop_rx, poll))?;

        self.worker = Some(Worker { stop_tx, handle });
        info!(poll_ms = poll.as_millis() as u64, "Background validator started");
        Ok(())
    }

    /// Stop and join the polling thread; a run in progress finishes first
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.stop_tx.send(());
        if worker.handle.join().is_err() {
            error!("Validator thread panicked");
        }
        info!("Background validator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Queue a run for the polling thread. Returns false if deduplicated or suppressed.
    pub fn request_validation(&self, tier: ValidationTier) -> bool {
        lock_state(&self.state).scheduler.request(tier, Instant::now())
    }

    /// Run a tier now on the calling thread, waiting for any run in progress
    pub fn force_validation(&self, tier: ValidationTier) -> Result<ValidationReport, IndexError> {
        let runner = self.runner()?;
        Ok(execute(&runner, &self.state, &self.run_lock, tier))
    }

    pub fn validation_status(&self) -> ValidationStatus {
        let state = lock_state(&self.state);
        let now = Instant::now();
        let due_in = |tier| {
            state
                .scheduler
                .next_due(tier)
                .map(|due| due.saturating_duration_since(now).as_millis() as u64)
        };
        ValidationStatus {
            running: self.worker.is_some(),
            in_progress: state.in_progress,
            pending: state.scheduler.pending(),
            last_quick: state.last_reports.get(&ValidationTier::Quick).cloned(),
            last_integrity: state.last_reports.get(&ValidationTier::Integrity).cloned(),
            next_quick_in_ms: due_in(ValidationTier::Quick),
            next_integrity_in_ms: due_in(ValidationTier::Integrity),
        }
    }
}

impl Drop for BackgroundValidator {
    fn drop(&mut self) {
        self.stop();
    }
}
