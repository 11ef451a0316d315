//! Filesystem helpers for extraction.
//!
//! Archive paths come from untrusted input, so they are checked segment by
//! segment before being joined onto the destination directory. Only plain
//! relative names survive; anything that could climb out of the destination
//! is reported as corruption.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{ArchiverError, Result};

/// Maps an archive path to its location under `dest`.
pub fn resolve(dest: &Path, archive_path: &str) -> Result<PathBuf> {
    let unsafe_path = || ArchiverError::UnsafePath(archive_path.to_owned());
    if archive_path.is_empty() {
        return Err(unsafe_path());
    }
    let mut out = dest.to_path_buf();
    for segment in archive_path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || !portable(segment) {
            return Err(unsafe_path());
        }
        out.push(segment);
    }
    Ok(out)
}

#[cfg(not(target_os = "windows"))]
fn portable(segment: &str) -> bool {
    !segment.contains('\0')
}

// Drive prefixes and backslashes would let a segment re-root the path.
#[cfg(target_os = "windows")]
fn portable(segment: &str) -> bool {
    !segment.contains(['\0', '\\', ':'])
}

/// Creates (or truncates) `path`, creating missing parent directories first.
pub fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiverError::io(e, parent))?;
    }
    File::create(path).map_err(|e| ArchiverError::io(e, path))
}
