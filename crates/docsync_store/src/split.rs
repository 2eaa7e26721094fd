//! Store that keeps bookkeeping records apart from content.
//!
//! Paths under the bookkeeping prefix (`.docsync/` by default) are routed
//! to a second store with the prefix stripped; everything else goes to the
//! content store. Commits land in the content store first so bookkeeping
//! never describes content that was not recorded.

use crate::error::{StoreError, StoreResult};
use crate::store::{CommitOutcome, RemoteOutcome, Store};
use crate::transaction::{is_under, normalize_path, StagedOp, Transaction};
use tokio_util::sync::CancellationToken;

/// Default prefix routed to the bookkeeping store.
pub const BOOKKEEPING_PREFIX: &str = ".docsync";

/// Routes content and bookkeeping paths to two independent stores.
#[derive(Debug)]
pub struct SplitStore<C, B> {
    content: C,
    bookkeeping: B,
    prefix: String,
}

enum Route {
    Content(String),
    Bookkeeping(String),
}

impl<C: Store, B: Store> SplitStore<C, B> {
    /// Creates a split store using [`BOOKKEEPING_PREFIX`].
    pub fn new(content: C, bookkeeping: B) -> Self {
        Self {
            content,
            bookkeeping,
            prefix: BOOKKEEPING_PREFIX.to_string(),
        }
    }

    /// Returns the content store.
    pub fn content(&self) -> &C {
        &self.content
    }

    /// Returns the bookkeeping store.
    pub fn bookkeeping(&self) -> &B {
        &self.bookkeeping
    }

    fn route(&self, path: &str) -> StoreResult<Route> {
        let path = normalize_path(path)?;
        if path == self.prefix {
            return Err(StoreError::InvalidPath {
                path,
                reason: "the bookkeeping root cannot be addressed directly",
            });
        }
        if is_under(&path, &self.prefix) {
            let inner = path[self.prefix.len() + 1..].to_string();
            Ok(Route::Bookkeeping(inner))
        } else {
            Ok(Route::Content(path))
        }
    }

    fn outer(&self, inner: &str) -> String {
        format!("{}/{inner}", self.prefix)
    }

    fn split(&self, tx: Transaction) -> StoreResult<(Transaction, Transaction)> {
        let mut content = Vec::new();
        let mut bookkeeping = Vec::new();
        for op in tx.into_ops() {
            let (target, path) = match self.route(op.path())? {
                Route::Content(p) => (&mut content, p),
                Route::Bookkeeping(p) => (&mut bookkeeping, p),
            };
            target.push(match op {
                StagedOp::Write { data, .. } => StagedOp::Write { path, data },
                StagedOp::Delete { .. } => StagedOp::Delete { path },
                StagedOp::Mkdir { .. } => StagedOp::Mkdir { path },
            });
        }
        Ok((
            Transaction::from_ops(content),
            Transaction::from_ops(bookkeeping),
        ))
    }
}

fn merge_remote(first: RemoteOutcome, second: RemoteOutcome) -> RemoteOutcome {
    use RemoteOutcome::{EmptyRemote, NoRemote, UpToDate, Updated};
    match (first, second) {
        (Updated, _) | (_, Updated) => Updated,
        (UpToDate, _) | (_, UpToDate) => UpToDate,
        (EmptyRemote, _) | (_, EmptyRemote) => EmptyRemote,
        (NoRemote, NoRemote) => NoRemote,
    }
}

impl<C: Store, B: Store> Store for SplitStore<C, B> {
    fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        match self.route(path)? {
            Route::Content(p) => self.content.read(&p),
            Route::Bookkeeping(p) => self.bookkeeping.read(&p).map_err(|e| match e {
                StoreError::NotFound { path } => StoreError::not_found(self.outer(&path)),
                other => other,
            }),
        }
    }

    fn exists(&self, path: &str) -> StoreResult<bool> {
        if normalize_path(path)? == self.prefix {
            return Ok(!self.bookkeeping.list("")?.is_empty());
        }
        match self.route(path)? {
            Route::Content(p) => self.content.exists(&p),
            Route::Bookkeeping(p) => self.bookkeeping.exists(&p),
        }
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let trimmed = prefix.trim_matches('/');
        let whole_bookkeeping = |this: &Self| -> StoreResult<Vec<String>> {
            Ok(this
                .bookkeeping
                .list("")?
                .iter()
                .map(|p| this.outer(p))
                .collect())
        };

        if trimmed.is_empty() {
            let mut all = self.content.list("")?;
            all.retain(|p| p != &self.prefix && !is_under(p, &self.prefix));
            all.extend(whole_bookkeeping(self)?);
            all.sort();
            return Ok(all);
        }
        if normalize_path(trimmed)? == self.prefix {
            return whole_bookkeeping(self);
        }
        match self.route(trimmed)? {
            Route::Content(p) => self.content.list(&p),
            Route::Bookkeeping(p) => Ok(self
                .bookkeeping
                .list(&p)?
                .iter()
                .map(|inner| self.outer(inner))
                .collect()),
        }
    }

    fn apply(&self, tx: Transaction) -> StoreResult<()> {
        let (content, bookkeeping) = self.split(tx)?;
        self.content.apply(content)?;
        self.bookkeeping.apply(bookkeeping)
    }

    fn commit(&self, tx: Transaction, message: &str) -> StoreResult<CommitOutcome> {
        let (content, bookkeeping) = self.split(tx)?;

        let mut paths = match self.content.commit(content, message)? {
            CommitOutcome::Committed { paths } => paths,
            CommitOutcome::Unchanged => Vec::new(),
        };
        if let CommitOutcome::Committed { paths: inner } =
            self.bookkeeping.commit(bookkeeping, message)?
        {
            paths.extend(inner.iter().map(|p| self.outer(p)));
        }

        if paths.is_empty() {
            Ok(CommitOutcome::Unchanged)
        } else {
            paths.sort();
            Ok(CommitOutcome::Committed { paths })
        }
    }

    fn pull(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        let content = self.content.pull(cancel)?;
        let bookkeeping = self.bookkeeping.pull(cancel)?;
        Ok(merge_remote(content, bookkeeping))
    }

    fn push(&self, cancel: &CancellationToken) -> StoreResult<RemoteOutcome> {
        let content = self.content.push(cancel)?;
        let bookkeeping = self.bookkeeping.push(cancel)?;
        Ok(merge_remote(content, bookkeeping))
    }
}
