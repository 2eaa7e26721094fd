//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::{CommitOutcome, RemoteOutcome, Store};
use crate::transaction::{is_under, normalize_path, StagedOp, Transaction};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;

/// A commit recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Commit message.
    pub message: String,
    /// Paths changed by the commit, sorted.
    pub paths: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    committed: BTreeMap<String, Vec<u8>>,
    commits: Vec<CommitRecord>,
    pushed_commits: usize,
    push_attempts: u32,
}

/// A store that keeps the working tree and history in memory.
///
/// This store is suitable for:
/// - Unit tests
/// - Integration tests that count commits
/// - Failure injection for commit and push paths
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use docsync_store::{MemoryStore, Store};
///
/// let store = MemoryStore::new();
/// let mut tx = store.begin_tx();
/// tx.write("notes/a.md", b"# A".to_vec()).unwrap();
/// assert!(store.commit(tx, "add a").unwrap().is_committed());
/// assert_eq!(store.read("notes/a.md").unwrap(), b"# A");
/// assert_eq!(store.commits().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    failing_commits: AtomicU32,
    failing_pushes: AtomicU32,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every commit recorded so far, oldest first.
    #[must_use]
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state.read().commits.clone()
    }

    /// Returns a copy of the working tree.
    #[must_use]
    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        self.state.read().files.clone()
    }

    /// Returns the number of push attempts, successful or not.
    #[must_use]
    pub fn push_attempts(&self) -> u32 {
        self.state.read().push_attempts
    }

    /// Makes the next `count` commits fail after applying their operations.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` pushes fail.
    pub fn fail_next_pushes(&self, count: u32) {
        self.failing_pushes.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl MemoryState {
    fn apply(&mut self, ops: &[StagedOp]) {
        for op in ops {
            match op {
                StagedOp::Write { path, data } => {
                    self.files.insert(path.clone(), data.clone());
                }
                StagedOp::Delete { path } => {
                    self.files
                        .retain(|p, _| p != path && !is_under(p, path));
                    self.dirs.retain(|d| d != path && !is_under(d, path));
                }
                StagedOp::Mkdir { path } => {
                    self.dirs.insert(path.clone());
                }
            }
        }
    }

    fn changed_paths(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = self.files.keys().chain(self.committed.keys()).collect();
        keys.into_iter()
            .filter(|k| self.files.get(*k) != self.committed.get(*k))
            .cloned()
            .collect()
    }
}

impl Store for MemoryStore {
    fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let path = normalize_path(path)?;
        self.state
            .read()
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| StoreError::not_found(path))
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        let path = normalize_path(path)?;
        let state = self.state.read();
        Ok(state.files.contains_key(&path)
            || state.dirs.contains(&path)
            || state.files.keys().any(|p| is_under(p, &path)))
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            normalize_path(prefix)?
        };
        let state = self.state.read();
        Ok(state
            .files
            .keys()
            .filter(|p| prefix.is_empty() || **p == prefix || is_under(p, &prefix))
            .cloned()
            .collect())
    }

    fn apply(&self, tx: Transaction) -> StoreResult<()> {
        self.state.write().apply(tx.ops());
        Ok(())
    }

    fn commit(&self, tx: Transaction, message: &str) -> StoreResult<CommitOutcome> {
        let mut state = self.state.write();
        state.apply(tx.ops());

        if Self::take_failure(&self.failing_commits) {
            return Err(StoreError::Other("injected commit failure".into()));
        }

        let paths = state.changed_paths();
        if paths.is_empty() {
            return Ok(CommitOutcome::Unchanged);
        }

        state.committed = state.files.clone();
        state.commits.push(CommitRecord {
            message: message.to_string(),
            paths: paths.clone(),
        });
        Ok(CommitOutcome::Committed { paths })
    }

    fn pull(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(RemoteOutcome::UpToDate)
    }

    fn push(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let mut state = self.state.write();
        state.push_attempts += 1;

        if Self::take_failure(&self.failing_pushes) {
            return Err(StoreError::git("push", "injected push failure"));
        }

        if state.pushed_commits == state.commits.len() {
            return Ok(RemoteOutcome::UpToDate);
        }
        state.pushed_commits = state.commits.len();
        Ok(RemoteOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_write_and_read() {
        let store = MemoryStore::new();
        let mut tx = store.begin_tx();
        tx.write("a/b.md", b"hello".to_vec()).unwrap();
        store.apply(tx).unwrap();

        assert_eq!(store.read("a/b.md").unwrap(), b"hello");
        assert!(store.exists("a").unwrap());
        assert!(!store.exists("b").unwrap());
    }

    #[test]
    fn memory_read_missing() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read("missing.md"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn memory_commit_only_when_changed() {
        let store = MemoryStore::new();

        let mut tx = store.begin_tx();
        tx.write("a.md", b"1".to_vec()).unwrap();
        assert!(store.commit(tx, "one").unwrap().is_committed());

        let mut tx = store.begin_tx();
        tx.write("a.md", b"1".to_vec()).unwrap();
        assert_eq!(store.commit(tx, "same").unwrap(), CommitOutcome::Unchanged);

        assert_eq!(store.commits().len(), 1);
        assert_eq!(store.commits()[0].message, "one");
    }

    #[test]
    fn memory_commit_picks_up_applied_changes() {
        let store = MemoryStore::new();
        let mut tx = store.begin_tx();
        tx.write("a.md", b"1".to_vec()).unwrap();
        store.apply(tx).unwrap();

        let outcome = store.commit(Transaction::new(), "checkpoint").unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                paths: vec!["a.md".into()]
            }
        );
    }

    #[test]
    fn memory_retried_commit_after_partial_apply() {
        let store = MemoryStore::new();
        let mut tx = store.begin_tx();
        for n in 0u8..4 {
            tx.write(&format!("docs/{n}.md"), vec![n]).unwrap();
        }

        store.apply(Transaction::from_ops(tx.ops()[..1].to_vec())).unwrap();
        assert_eq!(store.files().len(), 1);
        assert!(store.commits().is_empty());

        let outcome = store.commit(tx, "add docs").unwrap();
        assert!(outcome.is_committed());
        assert_eq!(store.commits().len(), 1);
        assert_eq!(store.commits()[0].paths.len(), 4);
        assert_eq!(store.files().len(), 4);
        assert_eq!(store.read("docs/3.md").unwrap(), vec![3u8]);
    }

    #[test]
    fn memory_failed_commit_is_retried_whole() {
        let store = MemoryStore::new();
        let mut tx = store.begin_tx();
        tx.write("a.md", b"a".to_vec()).unwrap();
        tx.write("b.md", b"b".to_vec()).unwrap();

        store.fail_next_commits(1);
        assert!(store.commit(tx.clone(), "add").is_err());
        assert!(store.commits().is_empty());

        assert!(store.commit(tx, "add").unwrap().is_committed());
        assert_eq!(store.commits().len(), 1);
        assert_eq!(store.commits()[0].paths, vec!["a.md".to_string(), "b.md".to_string()]);
    }

    #[test]
    fn memory_delete_directory() {
        let store = MemoryStore::new();
        let mut tx = store.begin_tx();
        tx.write("d/a.md", b"a".to_vec()).unwrap();
        tx.write("d/e/b.md", b"b".to_vec()).unwrap();
        tx.write("da.md", b"c".to_vec()).unwrap();
        store.apply(tx).unwrap();

        let mut tx = store.begin_tx();
        tx.delete("d").unwrap();
        store.apply(tx).unwrap();

        assert_eq!(store.list("").unwrap(), vec!["da.md".to_string()]);
    }

    #[test]
    fn memory_list_prefix() {
        let store = MemoryStore::new();
        let mut tx = store.begin_tx();
        tx.write("q/00000002.json", b"{}".to_vec()).unwrap();
        tx.write("q/00000001.json", b"{}".to_vec()).unwrap();
        tx.write("qq/x.json", b"{}".to_vec()).unwrap();
        store.apply(tx).unwrap();

        assert_eq!(
            store.list("q").unwrap(),
            vec!["q/00000001.json".to_string(), "q/00000002.json".to_string()]
        );
    }

    #[test]
    fn memory_injected_failures() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let mut tx = store.begin_tx();
        tx.write("a.md", b"1".to_vec()).unwrap();
        assert!(store.commit(tx, "fails").is_err());
        // Operations were applied; the next commit records them.
        assert!(store.commit(Transaction::new(), "retry").unwrap().is_committed());

        let token = CancellationToken::new();
        store.fail_next_pushes(2);
        assert!(store.push(&token).is_err());
        assert!(store.push(&token).is_err());
        assert_eq!(store.push(&token).unwrap(), RemoteOutcome::Updated);
        assert_eq!(store.push(&token).unwrap(), RemoteOutcome::UpToDate);
        assert_eq!(store.push_attempts(), 4);
    }
}
