//! Staged store transactions.

use crate::error::{StoreError, StoreResult};
use std::io::Read;

/// A single staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedOp {
    /// Create or replace a file.
    Write {
        /// Store-relative path.
        path: String,
        /// Full file contents.
        data: Vec<u8>,
    },
    /// Remove a file or directory tree.
    Delete {
        /// Store-relative path.
        path: String,
    },
    /// Create a directory and its parents.
    Mkdir {
        /// Store-relative path.
        path: String,
    },
}

impl StagedOp {
    /// Returns the path this operation touches.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            StagedOp::Write { path, .. } | StagedOp::Delete { path } | StagedOp::Mkdir { path } => {
                path
            }
        }
    }
}

/// Result of looking a path up in the staged operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staged<'a> {
    /// The last staged operation writes these bytes.
    Written(&'a [u8]),
    /// The last staged operation deletes the path (or one of its parents).
    Deleted,
}

/// An ordered list of staged operations against one logical store.
///
/// Nothing touches disk until the transaction is handed to
/// [`crate::Store::apply`] or [`crate::Store::commit`]. Dropping or rolling
/// back a transaction discards every staged operation.
///
/// # Invariants
///
/// - Operations are applied in the order they were staged
/// - Every staged path is a valid store-relative path
#[derive(Debug, Default, Clone)]
pub struct Transaction {
    ops: Vec<StagedOp>,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a file write.
    pub fn write(&mut self, path: &str, data: impl Into<Vec<u8>>) -> StoreResult<()> {
        let path = normalize_path(path)?;
        self.ops.push(StagedOp::Write {
            path,
            data: data.into(),
        });
        Ok(())
    }

    /// Stages a file write whose contents come from a reader.
    ///
    /// The reader is drained immediately; the bytes are held until commit.
    pub fn write_stream(&mut self, path: &str, mut reader: impl Read) -> StoreResult<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.write(path, data)
    }

    /// Stages a delete.
    pub fn delete(&mut self, path: &str) -> StoreResult<()> {
        let path = normalize_path(path)?;
        self.ops.push(StagedOp::Delete { path });
        Ok(())
    }

    /// Stages a directory creation.
    pub fn mkdir(&mut self, path: &str) -> StoreResult<()> {
        let path = normalize_path(path)?;
        self.ops.push(StagedOp::Mkdir { path });
        Ok(())
    }

    /// Builds a transaction from already-normalized operations.
    pub(crate) fn from_ops(ops: Vec<StagedOp>) -> Self {
        Self { ops }
    }

    /// Discards all staged operations.
    pub fn rollback(mut self) {
        tracing::debug!(discarded = self.ops.len(), "rolling back transaction");
        self.ops.clear();
    }

    /// Appends every operation of `other` after the operations of `self`.
    pub fn extend(&mut self, other: Transaction) {
        self.ops.extend(other.ops);
    }

    /// Returns the staged operations in order.
    #[must_use]
    pub fn ops(&self) -> &[StagedOp] {
        &self.ops
    }

    /// Consumes the transaction, returning the staged operations.
    #[must_use]
    pub fn into_ops(self) -> Vec<StagedOp> {
        self.ops
    }

    /// Returns the number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the effect of the staged operations on `path`, if any.
    ///
    /// Later operations win; deleting a directory hides writes staged
    /// beneath it earlier.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Staged<'_>> {
        self.ops.iter().rev().find_map(|op| match op {
            StagedOp::Write { path: p, data } if p == path => Some(Staged::Written(data)),
            StagedOp::Delete { path: p } if p == path || is_under(path, p) => Some(Staged::Deleted),
            _ => None,
        })
    }

    /// Returns the paths written (and not later deleted) beneath `prefix`.
    #[must_use]
    pub fn written_under(&self, prefix: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .ops
            .iter()
            .filter_map(|op| match op {
                StagedOp::Write { path, .. } if is_under(path, prefix) => Some(path.clone()),
                _ => None,
            })
            .filter(|path| matches!(self.lookup(path), Some(Staged::Written(_))))
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Returns true if `path` lies strictly beneath directory `dir`.
pub(crate) fn is_under(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    dir.is_empty()
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

/// Validates and normalizes a store-relative path.
///
/// Backslashes become slashes, duplicate and trailing separators are
/// dropped. Absolute paths, `..` components and anything inside `.git`
/// are rejected.
pub fn normalize_path(path: &str) -> StoreResult<String> {
    let invalid = |reason| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let unified = path.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(invalid("absolute paths are not allowed"));
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(invalid("parent components are not allowed")),
            _ => parts.push(part),
        }
    }

    if parts.is_empty() {
        return Err(invalid("path is empty"));
    }
    if parts[0] == ".git" {
        return Err(invalid("the .git directory is reserved"));
    }

    Ok(parts.join("/"))
}
