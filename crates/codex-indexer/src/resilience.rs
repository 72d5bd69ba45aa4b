//! Lock-contention retry and WAL checkpointing

use rusqlite::Connection;
use std::time::Duration;
use tracing::{error, warn};

use codex_core::IndexConfig;

use crate::connection::IndexError;

/// Exponential backoff for lock errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            max_retries: config.max_lock_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying lock errors with exponential backoff.
///
/// `op` runs at most `max_retries + 1` times. When retries run out the last
/// error is returned unchanged; any other error is returned on first sight.
pub fn with_lock_retry<T, F>(policy: &RetryPolicy, context: &str, mut op: F) -> Result<T, IndexError>
where
    F: FnMut() -> Result<T, IndexError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_locked() => {
                attempt += 1;
                if attempt > policy.max_retries {
                    error!(
                        context,
                        attempts = attempt,
                        "Database lock retry exhausted"
                    );
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    context,
                    attempt,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Database locked, retrying"
                );
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// `PRAGMA wal_checkpoint` modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Passive,
    Full,
    Restart,
    Truncate,
}

impl CheckpointMode {
    fn as_sql(&self) -> &'static str {
        match self {
            CheckpointMode::Passive => "PASSIVE",
            CheckpointMode::Full => "FULL",
            CheckpointMode::Restart => "RESTART",
            CheckpointMode::Truncate => "TRUNCATE",
        }
    }
}

/// Result row of `PRAGMA wal_checkpoint`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointResult {
    /// The checkpoint could not complete because of readers/writers
    pub busy: bool,
    /// Frames in the WAL (-1 when not in WAL mode)
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}

pub fn checkpoint(conn: &Connection, mode: CheckpointMode) -> Result<CheckpointResult, IndexError> {
    let sql = format!("PRAGMA wal_checkpoint({})", mode.as_sql());
    let result = conn.query_row(&sql, [], |row| {
        Ok(CheckpointResult {
            busy: row.get::<_, i64>(0)? != 0,
            log_frames: row.get(1)?,
            checkpointed_frames: row.get(2)?,
        })
    })?;
    Ok(result)
}
