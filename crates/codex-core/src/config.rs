//! Index configuration
//!
//! Loaded from an optional JSON file; every field has a default so an
//! empty object (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::CoreError;

/// Configuration for the index store, sync engine and background validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexConfig {
    pub quick_check_interval_ms: u64,
    pub integrity_check_interval_ms: u64,
    pub busy_timeout_ms: u64,
    pub wal_auto_checkpoint_pages: u32,
    pub hash_mismatch_early_termination_threshold: usize,
    /// Bypass the integrity cross-check entirely
    pub skip_sync_verification: bool,

    pub validation_poll_interval_ms: u64,
    pub max_jitter_ms: u64,
    /// A quick check is not scheduled if an integrity check ran this recently
    pub quick_suppression_window_ms: u64,
    pub max_lock_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Keep re-syncing mismatched files after the early-termination threshold
    pub repair_after_early_termination: bool,
    pub changed_file_ratio_threshold: f64,
    pub required_validations: u32,
    pub required_audio_validations: u32,
    pub word_batch_size: usize,
    pub fts_orphan_batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            quick_check_interval_ms: 300_000,
            integrity_check_interval_ms: 3_600_000,
            busy_timeout_ms: 10_000,
            wal_auto_checkpoint_pages: 1000,
            hash_mismatch_early_termination_threshold: 50,
            skip_sync_verification: false,
            validation_poll_interval_ms: 30_000,
            max_jitter_ms: 30_000,
            quick_suppression_window_ms: 600_000,
            max_lock_retries: 5,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 2_000,
            repair_after_early_termination: false,
            changed_file_ratio_threshold: 0.5,
            required_validations: 1,
            required_audio_validations: 1,
            word_batch_size: 50,
            fts_orphan_batch_size: 500,
        }
    }
}

impl IndexConfig {
    /// Load from a JSON file and validate
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Err(CoreError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: IndexConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, CoreError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let positive = [
            ("quickCheckIntervalMs", self.quick_check_interval_ms),
            ("integrityCheckIntervalMs", self.integrity_check_interval_ms),
            ("validationPollIntervalMs", self.validation_poll_interval_ms),
            ("wordBatchSize", self.word_batch_size as u64),
            ("ftsOrphanBatchSize", self.fts_orphan_batch_size as u64),
            (
                "hashMismatchEarlyTerminationThreshold",
                self.hash_mismatch_early_termination_threshold as u64,
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::InvalidConfig(format!("{} must be greater than 0", name)));
            }
        }

        if !(self.changed_file_ratio_threshold > 0.0 && self.changed_file_ratio_threshold <= 1.0) {
            return Err(CoreError::InvalidConfig(format!(
                "changedFileRatioThreshold must be in (0, 1], got {}",
                self.changed_file_ratio_threshold
            )));
        }

        Ok(())
    }

    pub fn quick_check_interval(&self) -> Duration {
        Duration::from_millis(self.quick_check_interval_ms)
    }

    pub fn integrity_check_interval(&self) -> Duration {
        Duration::from_millis(self.integrity_check_interval_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.validation_poll_interval_ms)
    }

    pub fn quick_suppression_window(&self) -> Duration {
        Duration::from_millis(self.quick_suppression_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.quick_check_interval_ms, 300_000);
        assert_eq!(config.integrity_check_interval_ms, 3_600_000);
        assert_eq!(config.hash_mismatch_early_termination_threshold, 50);
        assert!(!config.skip_sync_verification);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.json");
        fs::write(
            &path,
            r#"{"quickCheckIntervalMs": 1000, "skipSyncVerification": true}"#,
        )
        .unwrap();

        let config = IndexConfig::load(&path).unwrap();
        assert_eq!(config.quick_check_interval_ms, 1000);
        assert!(config.skip_sync_verification);
        assert_eq!(config.busy_timeout_ms, 10_000);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config = IndexConfig {
            word_batch_size: 0,
            ..IndexConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = IndexConfig::load(Path::new("/nonexistent/index.json"));
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }
}
