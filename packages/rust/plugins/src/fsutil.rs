//! Directory copy and timestamp helpers.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use doctree_shared::{DoctreeError, Result};

/// Recursively copy the contents of `src` into `dest`, preserving file
/// modification times. `dest` is created if missing; an existing non-empty
/// `dest` is only accepted with `nonempty_ok`, in which case files are
/// overwritten and nothing is deleted.
pub fn copy_tree(src: &Path, dest: &Path, nonempty_ok: bool) -> Result<()> {
    if !src.is_dir() {
        return Err(DoctreeError::io(
            src,
            io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
        ));
    }
    if dest.exists() {
        if !dest.is_dir() {
            return Err(DoctreeError::precondition(format!(
                "{} is not a directory",
                dest.display()
            )));
        }
        if !nonempty_ok && !is_empty_dir(dest)? {
            return Err(DoctreeError::precondition(format!(
                "refusing to copy into non-empty directory {}",
                dest.display()
            )));
        }
    } else {
        fs::create_dir_all(dest).map_err(|e| DoctreeError::io(dest, e))?;
    }

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| DoctreeError::io(&target, e))?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    debug!(src = %src.display(), dest = %dest.display(), "copied tree");
    Ok(())
}

/// Copy one file, creating parent directories and keeping its mtime.
pub fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DoctreeError::io(parent, e))?;
    }
    fs::copy(src, dest).map_err(|e| DoctreeError::io(src, e))?;
    if let Ok(modified) = fs::metadata(src).and_then(|meta| meta.modified()) {
        // Read-only files (git objects) cannot be reopened for writing.
        if let Err(e) = set_mtime(dest, modified) {
            debug!(path = %dest.display(), error = %e, "could not preserve mtime");
        }
    }
    Ok(())
}

/// Set a file's modification time.
pub fn set_mtime(path: &Path, time: SystemTime) -> Result<()> {
    File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(time))
        .map_err(|e| DoctreeError::io(path, e))
}

/// Modification time of a file.
pub fn mtime(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| DoctreeError::io(path, e))
}

pub fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path).map_err(|e| DoctreeError::io(path, e))?;
    Ok(entries.next().is_none())
}

/// Every regular file under `root`, sorted, skipping `.git` directories.
pub fn files_under(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Lower-cased extension with a leading dot, or `""`.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub(crate) fn walk_error(root: &Path, err: walkdir::Error) -> DoctreeError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    DoctreeError::io(path, err.into())
}
