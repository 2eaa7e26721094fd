//! Store trait definition.

use crate::error::StoreResult;
use crate::transaction::Transaction;
use tokio_util::sync::CancellationToken;

/// Outcome of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A commit was created covering these paths.
    Committed {
        /// Paths that changed, sorted.
        paths: Vec<String>,
    },
    /// The working tree already matched history; nothing was committed.
    Unchanged,
}

impl CommitOutcome {
    /// Returns true if a commit was created.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }
}

/// Outcome of a pull or push against the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// History moved.
    Updated,
    /// Nothing to transfer.
    UpToDate,
    /// The remote repository has no commits yet.
    EmptyRemote,
    /// No remote is configured; nothing was attempted.
    NoRemote,
}

/// A transactional, version-controlled file store.
///
/// Reads go straight to the working tree. Mutations are staged in a
/// [`Transaction`] and applied in one step under the store's write lock.
///
/// # Invariants
///
/// - Reads never observe a half-applied transaction
/// - `commit` creates at most one commit, and none when nothing changed
/// - An empty diff is a successful no-op, never an error
///
/// # Implementors
///
/// - [`crate::GitStore`] - working tree backed by a git repository
/// - [`crate::MemoryStore`] - for testing
/// - [`crate::SplitStore`] - routes content and bookkeeping to two stores
pub trait Store: Send + Sync {
    /// Reads a whole file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if the file does not exist.
    fn read(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Returns true if a file or directory exists at `path`.
    fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Lists every file beneath `prefix` recursively, sorted.
    ///
    /// An empty prefix lists the whole store. A missing directory yields an
    /// empty list.
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Starts a new transaction.
    fn begin_tx(&self) -> Transaction {
        Transaction::new()
    }

    /// Applies the staged operations to the working tree without recording
    /// a commit. A later [`Store::commit`] picks the changes up.
    fn apply(&self, tx: Transaction) -> StoreResult<()>;

    /// Applies the staged operations and records one commit if anything in
    /// the working tree differs from history.
    fn commit(&self, tx: Transaction, message: &str) -> StoreResult<CommitOutcome>;

    /// Fetches and merges the configured remote.
    fn pull(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome>;

    /// Pushes local history to the configured remote.
    fn push(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome>;
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        (**self).read(path)
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        (**self).exists(path)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        (**self).list(prefix)
    }

    fn begin_tx(&self) -> Transaction {
        (**self).begin_tx()
    }

    fn apply(&self, tx: Transaction) -> StoreResult<()> {
        (**self).apply(tx)
    }

    fn commit(&self, tx: Transaction, message: &str) -> StoreResult<CommitOutcome> {
        (**self).commit(tx, message)
    }

    fn pull(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        (**self).pull(cancel)
    }

    fn push(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        (**self).push(cancel)
    }
}
