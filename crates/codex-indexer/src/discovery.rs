//! File discovery for source and codex notebook files

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use codex_core::FileType;

use crate::connection::IndexError;

/// Directories never descended into
const SKIP_DIRS: &[&str] = &[".git", "node_modules"];

/// Find all notebook files (`*.source`, `*.codex`) below `dir`, sorted.
///
/// A missing `dir` yields no files. Any entry that cannot be read below an
/// existing `dir` fails the whole scan, so callers never mistake a partial
/// listing for the full set of files.
pub fn find_notebook_files(dir: &Path) -> Result<Vec<(PathBuf, FileType)>, IndexError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e
                .file_name()
                .to_str()
                .map(|name| SKIP_DIRS.contains(&name))
                .unwrap_or(false)
    }) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Some(file_type) = FileType::from_path(name) {
                files.push((entry.into_path(), file_type));
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Scan several roots concurrently; results are merged and sorted
pub fn find_notebook_files_in(roots: &[PathBuf]) -> Result<Vec<(PathBuf, FileType)>, IndexError> {
    let mut files = Vec::new();
    if roots.len() <= 1 {
        for root in roots {
            files.extend(find_notebook_files(root)?);
        }
    } else {
        let scans: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = roots
                .iter()
                .map(|root| scope.spawn(move || find_notebook_files(root)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(IndexError::Provider("directory scan panicked".into())))
                })
                .collect()
        });
        for scan in scans {
            files.extend(scan?);
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_notebook_files_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_notebook_files(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_find_notebook_files_filters_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join(".project").join("sourceTexts");
        let target_dir = tmp.path().join("files").join("target");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&target_dir).unwrap();

        fs::write(tmp.path().join("GEN.source"), "{}").unwrap();
        fs::write(target_dir.join("GEN.codex"), "{}").unwrap();
        fs::write(target_dir.join("readme.txt"), "hello").unwrap();
        fs::write(source_dir.join("EXO.source"), "{}").unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git").join("LEV.source"), "{}").unwrap();

        let files = find_notebook_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().any(|(p, t)| p.ends_with("GEN.source") && *t == FileType::Source));
        assert!(files.iter().any(|(p, t)| p.ends_with("GEN.codex") && *t == FileType::Codex));
        assert!(files.iter().any(|(p, _)| p.ends_with("sourceTexts/EXO.source")));
    }

    #[test]
    fn test_find_in_multiple_roots() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("GEN.source"), "{}").unwrap();
        fs::write(b.path().join("GEN.codex"), "{}").unwrap();
        fs::write(b.path().join("EXO.codex"), "{}").unwrap();

        let files =
            find_notebook_files_in(&[a.path().to_path_buf(), b.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_find_notebook_files_nonexistent_dir() {
        assert!(find_notebook_files(Path::new("/nonexistent/path")).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_fails_the_scan() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("GEN.source"), "{}").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("EXO.codex")).unwrap();

        let err = find_notebook_files(tmp.path()).unwrap_err();
        assert!(matches!(err, IndexError::Walk(_)));

        let b = tempfile::tempdir().unwrap();
        let err = find_notebook_files_in(&[b.path().to_path_buf(), tmp.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, IndexError::Walk(_)));
    }
}
