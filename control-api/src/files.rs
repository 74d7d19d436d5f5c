//! Recordings folder operations
//!
//! All HTTP file operations funnel through here. Names are basenames only;
//! anything that could step outside the recordings folder is rejected before
//! the filesystem is touched.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    #[error("unsafe file name: {0}")]
    UnsafeName(String),

    #[error("no such file: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry in a file listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u64,
    pub last_modified_utc: DateTime<Utc>,
}

/// Which files `list_files` returns.
pub enum ListFilter {
    All,
    Extension(String),
}

/// Reject anything that is not a plain basename.
fn check_name(name: &str) -> Result<(), FilesError> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(FilesError::UnsafeName(name.to_string()));
    }
    Ok(())
}

/// Resolve `name` under `dir`, guaranteeing the result stays inside it.
pub fn resolve_in_dir(dir: &Path, name: &str) -> Result<PathBuf, FilesError> {
    check_name(name)?;
    let path = dir.join(name);
    // A plain basename cannot escape, but keep the containment check as the
    // invariant the endpoints rely on.
    if !path.starts_with(dir) {
        return Err(FilesError::UnsafeName(name.to_string()));
    }
    Ok(path)
}

/// List regular files in `dir`, newest first.
pub fn list_files(dir: &Path, filter: &ListFilter) -> Result<Vec<FileEntry>, FilesError> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if let ListFilter::Extension(ext) = filter {
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext));
            if !matches {
                continue;
            }
        }

        entries.push(FileEntry {
            name: name.to_string(),
            size_bytes: metadata.len(),
            last_modified_utc: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        });
    }

    entries.sort_by(|a, b| b.last_modified_utc.cmp(&a.last_modified_utc));
    Ok(entries)
}

/// Stat a single file by basename.
pub fn stat_file(dir: &Path, name: &str) -> Result<FileEntry, FilesError> {
    let path = resolve_in_dir(dir, name)?;
    let metadata = fs::metadata(&path).map_err(|e| not_found_or_io(e, name))?;
    if !metadata.is_file() {
        return Err(FilesError::NotFound(name.to_string()));
    }
    Ok(FileEntry {
        name: name.to_string(),
        size_bytes: metadata.len(),
        last_modified_utc: metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Delete a single file by basename.
pub fn remove_file(dir: &Path, name: &str) -> Result<(), FilesError> {
    let path = resolve_in_dir(dir, name)?;
    let metadata = fs::metadata(&path).map_err(|e| not_found_or_io(e, name))?;
    if !metadata.is_file() {
        return Err(FilesError::NotFound(name.to_string()));
    }
    fs::remove_file(&path).map_err(|e| not_found_or_io(e, name))
}

fn not_found_or_io(e: std::io::Error, name: &str) -> FilesError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FilesError::NotFound(name.to_string())
    } else {
        FilesError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_rejects_traversal_names() {
        let dir = TempDir::new().unwrap();
        for name in ["../etc/passwd", "a/b.mp4", "a\\b.mp4", "..", ""] {
            assert!(
                matches!(
                    resolve_in_dir(dir.path(), name),
                    Err(FilesError::UnsafeName(_))
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_accepts_plain_basename() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_in_dir(dir.path(), "rec_cam1_2025-01-01_00-00-00.mp4").unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn test_list_newest_first_with_extension_filter() {
        let dir = TempDir::new().unwrap();
        let old = write_file(dir.path(), "old.mp4", b"aa");
        write_file(dir.path(), "new.mp4", b"bbbb");
        write_file(dir.path(), "notes.txt", b"x");

        // Push one file clearly into the past.
        let earlier = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(earlier)
            .unwrap();

        let listed = list_files(dir.path(), &ListFilter::Extension("mp4".into())).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "new.mp4");
        assert_eq!(listed[1].name, "old.mp4");
        assert_eq!(listed[0].size_bytes, 4);

        let all = list_files(dir.path(), &ListFilter::All).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_stat_and_remove_roundtrip() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "clip.mp4", b"123");

        let entry = stat_file(dir.path(), "clip.mp4").unwrap();
        assert_eq!(entry.size_bytes, 3);

        remove_file(dir.path(), "clip.mp4").unwrap();
        assert!(matches!(
            stat_file(dir.path(), "clip.mp4"),
            Err(FilesError::NotFound(_))
        ));
        assert!(matches!(
            remove_file(dir.path(), "clip.mp4"),
            Err(FilesError::NotFound(_))
        ));
    }

    #[test]
    fn test_stat_rejects_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(matches!(
            stat_file(dir.path(), "sub"),
            Err(FilesError::NotFound(_))
        ));
    }
}
