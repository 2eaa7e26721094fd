//! Git-backed store.
//!
//! Layout of a checkout managed by [`GitStore`]:
//!
//! ```text
//! <root>/
//! ├─ .git/
//! │  └─ docsync.lock   # Advisory lock for single-writer
//! └─ ...               # Working tree
//! ```

use crate::command::{run_git, GitOutput};
use crate::config::GitConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{CommitOutcome, RemoteOutcome, Store};
use crate::transaction::Transaction;
use crate::worktree::{self, TEMP_SUFFIX};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = "docsync.lock";

/// A store whose working tree lives in a git repository.
///
/// # Thread Safety
///
/// Reads take a shared lock; apply, commit, pull and push take the
/// exclusive lock, so they never interleave with each other or with
/// reads. Across processes the checkout is guarded by an advisory lock
/// held for the lifetime of the value.
#[derive(Debug)]
pub struct GitStore {
    root: PathBuf,
    config: GitConfig,
    lock: RwLock<()>,
    _lock_file: File,
}

impl GitStore {
    /// Opens, initializes or clones the repository at `root`.
    ///
    /// - Remote configured and `root` missing: clone. If the clone fails
    ///   because the remote is empty, initialize locally and register the
    ///   remote instead.
    /// - Otherwise open the existing repository or initialize a new one,
    ///   registering the remote if configured and not yet present.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails, the checkout is locked by another
    /// process, or `cancel` fires during a clone.
    pub fn open(root: &Path, config: GitConfig, cancel: &CancellationToken) -> StoreResult<Self> {
        match &config.remote {
            Some(remote) if !root.exists() => {
                let parent = root
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                fs::create_dir_all(parent)?;
                let target = root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| StoreError::InvalidPath {
                        path: root.display().to_string(),
                        reason: "clone target needs a directory name",
                    })?;
                info!(url = %remote.url, path = %target, "cloning repository");
                let out = run_git(
                    parent,
                    &["clone", "--origin", &remote.name, &remote.url, &target],
                    config.network_timeout,
                    Some(cancel),
                )?;
                if !out.success {
                    if out.mentions("empty repository") {
                        warn!("remote is empty, initializing locally");
                        fs::create_dir_all(root)?;
                        init_repo(root, &config)?;
                    } else {
                        return Err(StoreError::git("clone", out.stderr.trim()));
                    }
                } else if out.mentions("empty repository") {
                    // Cloning an empty remote leaves HEAD unborn on the
                    // remote's default branch name; point it at ours.
                    set_head(root, &config)?;
                }
            }
            _ => {
                fs::create_dir_all(root)?;
                if !root.join(".git").exists() {
                    info!(path = %root.display(), "initializing repository");
                    init_repo(root, &config)?;
                }
            }
        }

        ensure_remote(root, &config)?;
        exclude_temp_files(root)?;
        let lock_file = acquire_lock(root)?;

        Ok(Self {
            root: root.to_path_buf(),
            config,
            lock: RwLock::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the working tree root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    /// Returns the number of commits reachable from HEAD (0 when unborn).
    pub fn commit_count(&self) -> StoreResult<u64> {
        let _guard = self.lock.read();
        let out = self.git(&["rev-list", "--count", "HEAD"])?;
        if !out.success {
            return Ok(0);
        }
        out.stdout
            .trim()
            .parse()
            .map_err(|_| StoreError::git("rev-list", format!("unexpected output {:?}", out.stdout)))
    }

    fn git(&self, args: &[&str]) -> StoreResult<GitOutput> {
        run_git(&self.root, args, self.config.command_timeout, None)
    }

    fn git_as_author(&self, args: &[&str]) -> StoreResult<GitOutput> {
        let name = format!("user.name={}", self.config.author_name);
        let email = format!("user.email={}", self.config.author_email);
        let mut full = vec!["-c", &name, "-c", &email, "-c", "commit.gpgsign=false"];
        full.extend_from_slice(args);
        self.git(&full)
    }

    fn staged_paths(&self) -> StoreResult<Vec<String>> {
        let out = self
            .git(&["diff", "--cached", "--name-only", "-z"])?
            .check("diff")?;
        let mut paths: Vec<String> = out
            .stdout
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl Store for GitStore {
    fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let _guard = self.lock.read();
        worktree::read(&self.root, path)
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        let _guard = self.lock.read();
        Ok(worktree::resolve(&self.root, path)?.exists())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let _guard = self.lock.read();
        worktree::list(&self.root, prefix)
    }

    fn apply(&self, tx: Transaction) -> StoreResult<()> {
        let _guard = self.lock.write();
        let touched = worktree::apply_ops(&self.root, tx.ops())?;
        debug!(ops = touched.len(), "applied transaction");
        Ok(())
    }

    fn commit(&self, tx: Transaction, message: &str) -> StoreResult<CommitOutcome> {
        let _guard = self.lock.write();
        worktree::apply_ops(&self.root, tx.ops())?;

        self.git(&["add", "-A"])?.check("add")?;
        let paths = self.staged_paths()?;
        if paths.is_empty() {
            debug!(message, "nothing to commit");
            return Ok(CommitOutcome::Unchanged);
        }

        self.git_as_author(&["commit", "-q", "-m", message])?
            .check("commit")?;
        info!(message, files = paths.len(), "committed");
        Ok(CommitOutcome::Committed { paths })
    }

    fn pull(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        let Some(remote) = &self.config.remote else {
            return Ok(RemoteOutcome::NoRemote);
        };
        let _guard = self.lock.write();

        let name = format!("user.name={}", self.config.author_name);
        let email = format!("user.email={}", self.config.author_email);
        let out = run_git(
            &self.root,
            &[
                "-c",
                &name,
                "-c",
                &email,
                "pull",
                "--no-rebase",
                "--no-edit",
                &remote.name,
                &remote.branch,
            ],
            self.config.network_timeout,
            Some(cancel),
        )?;

        if out.mentions("couldn't find remote ref") {
            debug!(remote = %remote.name, "remote is empty");
            return Ok(RemoteOutcome::EmptyRemote);
        }
        let out = out.check("pull")?;
        if out.mentions("already up to date") || out.mentions("already up-to-date") {
            return Ok(RemoteOutcome::UpToDate);
        }
        info!(remote = %remote.name, branch = %remote.branch, "pulled");
        Ok(RemoteOutcome::Updated)
    }

    fn push(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        let Some(remote) = &self.config.remote else {
            return Ok(RemoteOutcome::NoRemote);
        };
        let _guard = self.lock.write();

        if !self.git(&["rev-parse", "--verify", "-q", "HEAD"])?.success {
            debug!("no commits yet, nothing to push");
            return Ok(RemoteOutcome::UpToDate);
        }

        let refspec = format!("HEAD:refs/heads/{}", remote.branch);
        let out = run_git(
            &self.root,
            &["push", &remote.name, &refspec],
            self.config.network_timeout,
            Some(cancel),
        )?
        .check("push")?;

        if out.mentions("everything up-to-date") {
            return Ok(RemoteOutcome::UpToDate);
        }
        info!(remote = %remote.name, branch = %remote.branch, "pushed");
        Ok(RemoteOutcome::Updated)
    }
}

fn init_repo(root: &Path, config: &GitConfig) -> StoreResult<()> {
    run_git(root, &["init", "-q"], config.command_timeout, None)?.check("init")?;
    set_head(root, config)
}

fn set_head(root: &Path, config: &GitConfig) -> StoreResult<()> {
    let head = format!("refs/heads/{}", config.branch());
    run_git(
        root,
        &["symbolic-ref", "HEAD", &head],
        config.command_timeout,
        None,
    )?
    .check("symbolic-ref")?;
    Ok(())
}

fn ensure_remote(root: &Path, config: &GitConfig) -> StoreResult<()> {
    let Some(remote) = &config.remote else {
        return Ok(());
    };
    let out = run_git(root, &["remote"], config.command_timeout, None)?.check("remote")?;
    if out.stdout.lines().any(|line| line.trim() == remote.name) {
        return Ok(());
    }
    info!(name = %remote.name, url = %remote.url, "registering remote");
    run_git(
        root,
        &["remote", "add", &remote.name, &remote.url],
        config.command_timeout,
        None,
    )?
    .check("remote")?;
    Ok(())
}

/// Adds the temp-file pattern to `.git/info/exclude` so files left by an
/// interrupted write are never staged.
fn exclude_temp_files(root: &Path) -> StoreResult<()> {
    let info = root.join(".git").join("info");
    fs::create_dir_all(&info)?;
    let exclude = info.join("exclude");
    let pattern = format!("*{TEMP_SUFFIX}");

    let current = match fs::read_to_string(&exclude) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if current.lines().any(|line| line.trim() == pattern) {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(&exclude)?;
    if !current.is_empty() && !current.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{pattern}")?;
    debug!(path = %exclude.display(), %pattern, "excluded temp files");
    Ok(())
}

fn acquire_lock(root: &Path) -> StoreResult<File> {
    let lock_path = root.join(".git").join(LOCK_FILE);
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    // Non-blocking: a second writer fails fast instead of queueing.
    if lock_file.try_lock_exclusive().is_err() {
        return Err(StoreError::Locked {
            path: root.display().to_string(),
        });
    }
    Ok(lock_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::git_available;
    use crate::config::RemoteConfig;
    use tempfile::tempdir;

    fn open(path: &Path) -> GitStore {
        GitStore::open(path, GitConfig::default(), &CancellationToken::new()).unwrap()
    }

    #[test]
    fn init_creates_repository() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        let store = open(&root);
        assert!(root.join(".git").exists());
        assert_eq!(store.commit_count().unwrap(), 0);
    }

    #[test]
    fn commit_creates_exactly_one_commit() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let mut tx = store.begin_tx();
        tx.write("docs/a.md", b"# A\n".to_vec()).unwrap();
        tx.write("docs/b.md", b"# B\n".to_vec()).unwrap();
        let outcome = store.commit(tx, "add docs").unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                paths: vec!["docs/a.md".into(), "docs/b.md".into()]
            }
        );
        assert_eq!(store.commit_count().unwrap(), 1);
        assert_eq!(store.read("docs/a.md").unwrap(), b"# A\n");
    }

    #[test]
    fn empty_diff_is_noop() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let mut tx = store.begin_tx();
        tx.write("a.md", b"same".to_vec()).unwrap();
        store.commit(tx, "first").unwrap();

        let mut tx = store.begin_tx();
        tx.write("a.md", b"same".to_vec()).unwrap();
        assert_eq!(store.commit(tx, "second").unwrap(), CommitOutcome::Unchanged);
        assert_eq!(
            store.commit(store.begin_tx(), "third").unwrap(),
            CommitOutcome::Unchanged
        );
        assert_eq!(store.commit_count().unwrap(), 1);
    }

    #[test]
    fn apply_then_checkpoint_commit() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let mut tx = store.begin_tx();
        tx.write("a.md", b"a".to_vec()).unwrap();
        store.apply(tx).unwrap();
        let mut tx = store.begin_tx();
        tx.write("b.md", b"b".to_vec()).unwrap();
        store.apply(tx).unwrap();
        assert_eq!(store.commit_count().unwrap(), 0);

        let outcome = store.commit(store.begin_tx(), "checkpoint").unwrap();
        assert!(outcome.is_committed());
        assert_eq!(store.commit_count().unwrap(), 1);
    }

    #[test]
    fn delete_is_committed() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let mut tx = store.begin_tx();
        tx.write("a.md", b"a".to_vec()).unwrap();
        store.commit(tx, "add").unwrap();

        let mut tx = store.begin_tx();
        tx.delete("a.md").unwrap();
        let outcome = store.commit(tx, "remove").unwrap();
        assert!(outcome.is_committed());
        assert!(!store.exists("a.md").unwrap());
    }

    #[test]
    fn retried_commit_after_partial_apply_lands_once() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let mut tx = store.begin_tx();
        for n in 0..5 {
            tx.write(&format!("docs/page-{n}.md"), format!("# {n}\n")).unwrap();
        }
        // A crash after two files reached the working tree.
        let partial = Transaction::from_ops(tx.ops()[..2].to_vec());
        worktree::apply_ops(dir.path(), partial.ops()).unwrap();
        fs::write(dir.path().join("docs/.page-2.md.docsync-tmp"), b"# 2").unwrap();
        assert_eq!(store.commit_count().unwrap(), 0);

        drop(store);
        let store = open(dir.path());
        let outcome = store.commit(tx, "add pages").unwrap();

        let CommitOutcome::Committed { paths } = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };
        assert_eq!(paths.len(), 5);
        assert!(paths.iter().all(|p| !p.ends_with(TEMP_SUFFIX)));
        assert_eq!(store.commit_count().unwrap(), 1);
        for n in 0..5 {
            assert_eq!(
                store.read(&format!("docs/page-{n}.md")).unwrap(),
                format!("# {n}\n").into_bytes()
            );
        }
    }

    #[test]
    fn leftover_temp_files_are_never_staged() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        fs::write(dir.path().join(".a.md.docsync-tmp"), b"partial").unwrap();

        let mut tx = store.begin_tx();
        tx.write("a.md", b"a".to_vec()).unwrap();
        let outcome = store.commit(tx, "add a").unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                paths: vec!["a.md".into()]
            }
        );

        let tracked = store.git(&["ls-files"]).unwrap().check("ls-files").unwrap();
        assert_eq!(tracked.stdout.trim(), "a.md");
        assert!(store.list("").unwrap().iter().all(|p| !p.ends_with(TEMP_SUFFIX)));
    }

    #[test]
    fn temp_pattern_is_excluded_once() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        drop(open(dir.path()));
        drop(open(dir.path()));

        let exclude = fs::read_to_string(dir.path().join(".git/info/exclude")).unwrap();
        let pattern = format!("*{TEMP_SUFFIX}");
        assert_eq!(exclude.lines().filter(|l| l.trim() == pattern).count(), 1);
    }

    #[test]
    fn second_open_is_locked() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let _store = open(dir.path());
        let err = GitStore::open(dir.path(), GitConfig::default(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
    }

    #[test]
    fn no_remote_pull_and_push_are_noops() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let token = CancellationToken::new();
        assert_eq!(store.pull(&token).unwrap(), RemoteOutcome::NoRemote);
        assert_eq!(store.push(&token).unwrap(), RemoteOutcome::NoRemote);
    }

    #[test]
    fn clone_push_and_pull_with_bare_remote() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let bare = dir.path().join("remote.git");
        fs::create_dir_all(&bare).unwrap();
        let timeout = GitConfig::default().command_timeout;
        run_git(&bare, &["init", "-q", "--bare"], timeout, None)
            .unwrap()
            .check("init")
            .unwrap();
        run_git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"], timeout, None)
            .unwrap()
            .check("symbolic-ref")
            .unwrap();
        let url = bare.to_string_lossy().into_owned();
        let token = CancellationToken::new();

        let config = GitConfig::default().with_remote(RemoteConfig::new(url.clone()));
        let first = GitStore::open(&dir.path().join("one"), config.clone(), &token).unwrap();
        assert_eq!(first.pull(&token).unwrap(), RemoteOutcome::EmptyRemote);

        let mut tx = first.begin_tx();
        tx.write("a.md", b"a".to_vec()).unwrap();
        first.commit(tx, "add a").unwrap();
        assert_eq!(first.push(&token).unwrap(), RemoteOutcome::Updated);

        let second = GitStore::open(&dir.path().join("two"), config, &token).unwrap();
        assert_eq!(second.read("a.md").unwrap(), b"a");
        assert_eq!(second.pull(&token).unwrap(), RemoteOutcome::UpToDate);
    }
}
