//! Working-tree file operations shared by on-disk stores.
//!
//! Writes go through a temporary sibling file that is synced and renamed
//! into place, so a reader (or a crash) sees either the old or the new
//! contents of each file, never a torn write.

use crate::error::{StoreError, StoreResult};
use crate::transaction::{normalize_path, StagedOp};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Suffix of in-flight temporary files; skipped by listings.
pub(crate) const TEMP_SUFFIX: &str = ".docsync-tmp";

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Resolves a validated store-relative path against `root`.
pub(crate) fn resolve(root: &Path, path: &str) -> StoreResult<PathBuf> {
    let path = normalize_path(path)?;
    Ok(root.join(path))
}

/// Reads a file below `root`.
pub(crate) fn read(root: &Path, path: &str) -> StoreResult<Vec<u8>> {
    let full = resolve(root, path)?;
    match fs::read(&full) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::not_found(path)),
        Err(e) => Err(e.into()),
    }
}

/// Lists files below `root/prefix` recursively as sorted store paths.
///
/// The `.git` directory and temporary files are never listed.
pub(crate) fn list(root: &Path, prefix: &str) -> StoreResult<Vec<String>> {
    let start = if prefix.trim_matches('/').is_empty() {
        root.to_path_buf()
    } else {
        resolve(root, prefix)?
    };

    let mut out = Vec::new();
    if start.is_file() {
        out.push(relative(root, &start));
        return Ok(out);
    }
    if !start.is_dir() {
        return Ok(out);
    }

    let mut stack = vec![start];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if dir == root && name == ".git" {
                continue;
            }
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                out.push(relative(root, &entry.path()));
            }
        }
    }

    out.sort();
    Ok(out)
}

/// Applies staged operations in order. Returns the touched paths.
pub(crate) fn apply_ops(root: &Path, ops: &[StagedOp]) -> StoreResult<Vec<String>> {
    let mut touched = Vec::with_capacity(ops.len());
    for op in ops {
        let full = resolve(root, op.path())?;
        match op {
            StagedOp::Write { data, .. } => write_atomic(&full, data)?,
            StagedOp::Delete { .. } => remove(root, &full)?,
            StagedOp::Mkdir { .. } => create_dirs(&full)?,
        }
        touched.push(op.path().to_string());
    }
    Ok(touched)
}

/// Writes `data` to `path` through a synced temporary file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        create_dirs(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}{TEMP_SUFFIX}"));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }

    let mut file = options.open(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    Ok(())
}

fn create_dirs(path: &Path) -> StoreResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path)?;
    Ok(())
}

/// Removes a file or directory tree, then prunes empty parents up to root.
fn remove(root: &Path, path: &Path) -> StoreResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // Stops at the first non-empty directory.
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
