//! File providers: where the sync engine and validator get documents from

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use codex_core::{CellInput, FileEntry, FileStat};

use crate::connection::IndexError;
use crate::discovery;

/// Source of documents and their bytes.
///
/// Cells are loaded per file so a malformed document fails its own sync
/// instead of the whole listing.
pub trait FileProvider: Send + Sync {
    /// Every document currently known, sorted by path. A listing that may
    /// have missed documents is an error, never a shorter list.
    fn list_files(&self) -> Result<Vec<FileEntry>, IndexError>;

    /// Logical cells of one document, in document order
    fn read_cells(&self, entry: &FileEntry) -> Result<Vec<CellInput>, IndexError>;

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, IndexError>;

    fn stat(&self, path: &str) -> Result<FileStat, IndexError>;
}

/// Notebook JSON as written by the editor
#[derive(Debug, Deserialize)]
struct Notebook {
    #[serde(default)]
    cells: Vec<NotebookCell>,
}

#[derive(Debug, Deserialize)]
struct NotebookCell {
    #[serde(default)]
    value: String,
    #[serde(default)]
    metadata: Value,
}

/// Parse notebook bytes into cells; cells without a `metadata.id` are skipped
pub fn parse_notebook(path: &str, bytes: &[u8]) -> Result<Vec<CellInput>, IndexError> {
    let notebook: Notebook = serde_json::from_slice(bytes).map_err(|e| IndexError::InvalidFile {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    Ok(notebook
        .cells
        .into_iter()
        .filter_map(|cell| {
            let id = cell.metadata.get("id")?.as_str()?.to_string();
            if id.is_empty() {
                return None;
            }
            Some(CellInput {
                id,
                value: cell.value,
                raw_value: None,
                metadata: cell.metadata,
            })
        })
        .collect())
}

/// Provider over `*.source` / `*.codex` notebooks in one or more directories
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    roots: Vec<PathBuf>,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
        }
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl FileProvider for DirectoryProvider {
    fn list_files(&self) -> Result<Vec<FileEntry>, IndexError> {
        Ok(discovery::find_notebook_files_in(&self.roots)?
            .into_iter()
            .map(|(path, file_type)| FileEntry {
                path: path.to_string_lossy().into_owned(),
                file_type,
            })
            .collect())
    }

    fn read_cells(&self, entry: &FileEntry) -> Result<Vec<CellInput>, IndexError> {
        let bytes = self.read_bytes(&entry.path)?;
        parse_notebook(&entry.path, &bytes)
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, IndexError> {
        Ok(std::fs::read(Path::new(path))?)
    }

    fn stat(&self, path: &str) -> Result<FileStat, IndexError> {
        let metadata = std::fs::metadata(Path::new(path))?;
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(FileStat {
            mtime_ms,
            size: metadata.len(),
        })
    }
}
