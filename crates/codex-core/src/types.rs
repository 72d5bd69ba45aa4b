//! Core type definitions for indexed content

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of a translation pair a document provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Source-language document (`*.source`)
    Source,
    /// Target-language translation notebook (`*.codex`)
    Codex,
}

impl FileType {
    /// Stored representation in the `files` and `sync_metadata` tables
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Source => "source",
            FileType::Codex => "codex",
        }
    }

    /// The cell side this file type writes to
    pub fn side(&self) -> ContentSide {
        match self {
            FileType::Source => ContentSide::Source,
            FileType::Codex => ContentSide::Target,
        }
    }

    /// Infer the file type from a path's extension
    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".source") {
            Some(FileType::Source)
        } else if path.ends_with(".codex") {
            Some(FileType::Codex)
        } else {
            None
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(FileType::Source),
            "codex" | "target" => Ok(FileType::Codex),
            other => Err(format!("unknown file type: {}", other)),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a cell; also the FTS content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSide {
    Source,
    Target,
}

impl ContentSide {
    /// Value of the `content_type` column in `cells_fts`
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentSide::Source => "source",
            ContentSide::Target => "target",
        }
    }

    /// Column prefix in the `cells` table (`s_` / `t_`)
    pub fn column_prefix(&self) -> &'static str {
        match self {
            ContentSide::Source => "s",
            ContentSide::Target => "t",
        }
    }
}

impl std::str::FromStr for ContentSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ContentSide::Source),
            "target" => Ok(ContentSide::Target),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

impl std::fmt::Display for ContentSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document known to a file provider, before its cells are loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Provider-unique path (the sync key)
    pub path: String,
    pub file_type: FileType,
}

/// Modification time and size as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Milliseconds since the Unix epoch
    pub mtime_ms: i64,
    pub size: u64,
}

/// One logical cell produced by upstream format parsing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellInput {
    pub id: String,
    /// Cell value as edited (may contain markup)
    pub value: String,
    /// Formatted value, when it differs from `value`
    #[serde(default)]
    pub raw_value: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// A validation stamp left by a reviewer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationEntry {
    pub username: String,
    #[serde(default)]
    pub is_deleted: bool,
}

/// The subset of cell metadata the index understands.
///
/// Everything else is kept verbatim in the `metadata` column.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMetadata {
    #[serde(default)]
    pub milestone_index: Option<i64>,
    #[serde(default)]
    pub validated_by: Vec<ValidationEntry>,
    #[serde(default)]
    pub audio_validated_by: Vec<ValidationEntry>,
}

impl CellMetadata {
    /// Lenient parse: unknown shapes yield the empty metadata
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn text_validation(&self, required: u32) -> ValidationState {
        ValidationState::from_entries(&self.validated_by, required)
    }

    pub fn audio_validation(&self, required: u32) -> ValidationState {
        ValidationState::from_entries(&self.audio_validated_by, required)
    }
}

/// Validation count, active validators, and fully-validated flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationState {
    pub count: i64,
    pub validators: Vec<String>,
    pub fully_validated: bool,
}

impl ValidationState {
    fn from_entries(entries: &[ValidationEntry], required: u32) -> Self {
        let mut validators: Vec<String> = entries
            .iter()
            .filter(|e| !e.is_deleted && !e.username.is_empty())
            .map(|e| e.username.clone())
            .collect();
        validators.sort();
        validators.dedup();

        let count = validators.len() as i64;
        Self {
            count,
            fully_validated: required > 0 && count >= i64::from(required),
            validators,
        }
    }

    /// Validators as the JSON array stored in `*_validated_by`
    pub fn validators_json(&self) -> String {
        serde_json::to_string(&self.validators).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Aggregate counts over indexed content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStats {
    pub total_cells: i64,
    pub total_words: i64,
    pub total_files: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_type_from_path() {
        assert_eq!(FileType::from_path("GEN.source"), Some(FileType::Source));
        assert_eq!(FileType::from_path("files/GEN.codex"), Some(FileType::Codex));
        assert_eq!(FileType::from_path("notes.txt"), None);
    }

    #[test]
    fn test_file_type_side() {
        assert_eq!(FileType::Source.side(), ContentSide::Source);
        assert_eq!(FileType::Codex.side(), ContentSide::Target);
        assert_eq!("target".parse::<FileType>().unwrap(), FileType::Codex);
    }

    #[test]
    fn test_file_type_orders_with_paths() {
        let mut files = vec![
            ("b/GEN.codex".to_string(), FileType::Codex),
            ("a/GEN.source".to_string(), FileType::Source),
            ("a/GEN.source".to_string(), FileType::Codex),
        ];
        files.sort();
        assert_eq!(files[0], ("a/GEN.source".to_string(), FileType::Source));
        assert_eq!(files[1].1, FileType::Codex);
        assert!(ContentSide::Source < ContentSide::Target);
    }

    #[test]
    fn test_validation_ignores_deleted_entries() {
        let meta = CellMetadata::from_value(&json!({
            "validatedBy": [
                {"username": "anna"},
                {"username": "ben", "isDeleted": true},
                {"username": "anna"}
            ],
            "milestoneIndex": 4
        }));

        let state = meta.text_validation(1);
        assert_eq!(state.count, 1);
        assert_eq!(state.validators, vec!["anna".to_string()]);
        assert!(state.fully_validated);
        assert_eq!(meta.milestone_index, Some(4));

        let audio = meta.audio_validation(1);
        assert_eq!(audio.count, 0);
        assert!(!audio.fully_validated);
    }

    #[test]
    fn test_metadata_tolerates_unexpected_shapes() {
        let meta = CellMetadata::from_value(&json!({"validatedBy": "nobody"}));
        assert!(meta.validated_by.is_empty());

        let meta = CellMetadata::from_value(&Value::Null);
        assert_eq!(meta.milestone_index, None);
    }
}
