//! The sync engine and pass orchestration.

use crate::client::{cancellable_sleep, ThrottledSource};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::sync::{SyncOptions, SyncProgress, SyncReport, StopReason};
use chrono::{DateTime, Utc};
use docsync_core::{Queue, Registries, RemoteSource};
use docsync_store::{CommitOutcome, RemoteOutcome, Store, StoreError};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What the engine is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Engine is idle.
    Idle,
    /// Discovering remote changes.
    Pulling,
    /// Draining the work queue.
    Syncing,
    /// Removing orphans.
    CleaningUp,
    /// Rebuilding registries from files.
    Reindexing,
    /// Pushing history to the remote.
    Pushing,
}

impl EnginePhase {
    /// Returns true if an operation is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, EnginePhase::Idle)
    }
}

/// Statistics about engine operations.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Passes completed.
    pub passes_completed: u64,
    /// Units of work processed, including skipped and dropped items.
    pub units_processed: u64,
    /// Items dropped after a permanent remote failure.
    pub items_dropped: u64,
    /// Commits created.
    pub commits: u64,
    /// Checkpoints that failed and were skipped.
    pub failed_checkpoints: u64,
    /// Successful pushes.
    pub pushes: u64,
    /// Push retries.
    pub push_retries: u64,
    /// End of the last pass.
    pub last_pass: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one worker pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// The sync run.
    pub sync: SyncReport,
    /// Commits created during the pass, checkpoints included.
    pub commits: u64,
    /// Outcome of the push, if one was attempted.
    pub pushed: Option<RemoteOutcome>,
}

/// Drives discovery, materialization, cleanup and reindexing against
/// one store and one remote source.
///
/// All operations are synchronous and take `&self`; at most one of them
/// runs at a time, and a second caller gets [`EngineError::Busy`].
pub struct SyncEngine<R> {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) remote: R,
    pub(crate) registries: Registries,
    pub(crate) queue: Queue,
    phase: RwLock<EnginePhase>,
    stats: RwLock<EngineStats>,
}

/// Resets the engine phase when an operation ends.
pub(crate) struct PhaseGuard<'a> {
    phase: &'a RwLock<EnginePhase>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.write() = EnginePhase::Idle;
    }
}

impl<R: RemoteSource> SyncEngine<R> {
    /// Creates an engine over `store`, fetching from `remote`.
    pub fn new(config: EngineConfig, store: Arc<dyn Store>, remote: R) -> Self {
        Self {
            registries: Registries::new(Arc::clone(&store)),
            queue: Queue::new(Arc::clone(&store)),
            config,
            store,
            remote,
            phase: RwLock::new(EnginePhase::Idle),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Gets the store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Gets the remote source.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Gets the registries.
    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Gets the work queue.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Gets the current phase.
    pub fn phase(&self) -> EnginePhase {
        *self.phase.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub(crate) fn enter(&self, phase: EnginePhase) -> EngineResult<PhaseGuard<'_>> {
        let mut current = self.phase.write();
        if current.is_active() {
            return Err(EngineError::Busy { phase: *current });
        }
        *current = phase;
        Ok(PhaseGuard { phase: &self.phase })
    }

    pub(crate) fn record_units(&self, progress: &SyncProgress) {
        let mut stats = self.stats.write();
        stats.units_processed += progress.units;
        stats.items_dropped += progress.items_dropped;
    }

    /// Commits whatever the working tree holds.
    ///
    /// A failed checkpoint is logged and skipped; the changes stay in
    /// the working tree for the next one. Returns true if a commit was
    /// created.
    pub fn checkpoint(&self, message: &str) -> bool {
        match self.store.commit(self.store.begin_tx(), message) {
            Ok(CommitOutcome::Committed { paths }) => {
                tracing::info!(message, files = paths.len(), "checkpoint committed");
                self.stats.write().commits += 1;
                true
            }
            Ok(CommitOutcome::Unchanged) => false,
            Err(e) => {
                tracing::warn!(message, error = %e, "checkpoint failed; continuing");
                self.stats.write().failed_checkpoints += 1;
                false
            }
        }
    }

    /// Pushes local history, retrying transient failures with backoff.
    pub fn push_with_retry(&self, cancel: &CancellationToken) -> EngineResult<RemoteOutcome> {
        let retry = &self.config.push_retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if !cancellable_sleep(retry.delay_for_attempt(attempt), cancel) {
                return Err(EngineError::Cancelled);
            }
            attempt += 1;

            match self.store.push(cancel) {
                Ok(outcome) => {
                    tracing::info!(?outcome, attempt, "pushed");
                    self.stats.write().pushes += 1;
                    return Ok(outcome);
                }
                Err(StoreError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(attempt, max_attempts, error = %e, "push failed, retrying");
                    self.stats.write().push_retries += 1;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "push failed");
                    return Err(EngineError::Push {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Runs one pass: drain the queue, commit, then push.
    ///
    /// A checkpoint commit is made every `checkpoint_every` units of work
    /// and once more at the end. The push is skipped when nothing was
    /// committed, when pushing is disabled, or when the pass was cancelled.
    pub fn run_pass(&self, cancel: &CancellationToken) -> EngineResult<PassReport> {
        let every = self.config.checkpoint_every.max(1);
        let mut commits = 0u64;
        let mut next_checkpoint = every;

        let result = self.sync_with_progress(&SyncOptions::default(), cancel, &mut |progress: &SyncProgress| {
            if progress.units >= next_checkpoint {
                next_checkpoint = progress.units + every;
                let message = format!("sync: checkpoint after {} items", progress.units);
                if self.checkpoint(&message) {
                    commits += 1;
                }
            }
        });

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                // Keep whatever finished before the failure.
                self.checkpoint("sync: partial pass");
                self.stats.write().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let message = match report.stop_reason {
            Some(reason) => format!("sync: {} items ({reason})", report.progress.units),
            None => format!("sync: {} items", report.progress.units),
        };
        if self.checkpoint(&message) {
            commits += 1;
        }

        let cancelled = report.stop_reason == Some(StopReason::Cancelled);
        let pushed = if commits > 0 && self.config.push_after_pass && !cancelled {
            let _guard = self.enter(EnginePhase::Pushing)?;
            Some(self.push_with_retry(cancel)?)
        } else {
            None
        };

        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            stats.last_pass = Some(Utc::now());
        }
        tracing::info!(
            units = report.progress.units,
            commits,
            stop = ?report.stop_reason,
            "pass finished"
        );

        Ok(PassReport {
            sync: report,
            commits,
            pushed,
        })
    }
}

impl<R: RemoteSource> SyncEngine<ThrottledSource<R>> {
    /// Creates an engine whose remote calls are throttled and retried
    /// according to `config.rate_limit`.
    ///
    /// Backoff waits end when `cancel` fires.
    pub fn throttled(
        config: EngineConfig,
        store: Arc<dyn Store>,
        remote: R,
        cancel: CancellationToken,
    ) -> Self {
        let remote = ThrottledSource::new(remote, config.rate_limit.clone(), cancel);
        Self::new(config, store, remote)
    }
}

impl<R> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("phase", &*self.phase.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use docsync_core::{
        BlockPage, Entity, EntityId, EntityPage, RemoteError, RemoteResult, SearchControl, User,
    };
    use docsync_store::MemoryStore;
    use std::time::Duration;

    struct Offline;

    impl RemoteSource for Offline {
        fn fetch_entity(&self, id: &EntityId) -> RemoteResult<Entity> {
            Err(RemoteError::not_found(id.as_str()))
        }
        fn fetch_block_children(&self, _: &EntityId, _: Option<&str>) -> RemoteResult<BlockPage> {
            Ok(BlockPage::default())
        }
        fn query_database(&self, _: &EntityId, _: Option<&str>) -> RemoteResult<EntityPage> {
            Ok(EntityPage::default())
        }
        fn search(&self, _: &str, _: &mut dyn FnMut(Entity) -> SearchControl) -> RemoteResult<()> {
            Ok(())
        }
        fn fetch_user(&self, id: &EntityId) -> RemoteResult<User> {
            Err(RemoteError::not_found(id.as_str()))
        }
        fn download(&self, url: &str) -> RemoteResult<Vec<u8>> {
            Err(RemoteError::not_found(url))
        }
    }

    fn engine(retry: RetryConfig) -> (Arc<MemoryStore>, SyncEngine<Offline>) {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::new().with_push_retry(retry);
        let engine = SyncEngine::new(config, store.clone(), Offline);
        (store, engine)
    }

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts).with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn checkpoint_swallows_failures() {
        let (store, engine) = engine(RetryConfig::no_retry());
        let mut tx = store.begin_tx();
        tx.write("docs/a.md", "a").unwrap();
        store.apply(tx).unwrap();

        store.fail_next_commits(1);
        assert!(!engine.checkpoint("first"));
        assert_eq!(engine.stats().failed_checkpoints, 1);

        assert!(engine.checkpoint("second"));
        assert!(!engine.checkpoint("third"));
        assert_eq!(store.commits().len(), 1);
        assert_eq!(store.commits()[0].message, "second");
    }

    #[test]
    fn push_retries_transient_failures() {
        let (store, engine) = engine(fast_retry(3));
        store.fail_next_pushes(2);

        let cancel = CancellationToken::new();
        assert!(engine.push_with_retry(&cancel).is_ok());
        assert_eq!(store.push_attempts(), 3);
        assert_eq!(engine.stats().push_retries, 2);
    }

    #[test]
    fn push_gives_up_after_max_attempts() {
        let (store, engine) = engine(fast_retry(2));
        store.fail_next_pushes(5);

        let err = engine.push_with_retry(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::Push { attempts: 2, .. }));
        assert_eq!(store.push_attempts(), 2);
    }

    #[test]
    fn cancelled_push_stops() {
        let (_store, engine) = engine(fast_retry(3));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            engine.push_with_retry(&cancel),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn empty_pass_commits_and_pushes_nothing() {
        let (store, engine) = engine(fast_retry(1));
        let report = engine.run_pass(&CancellationToken::new()).unwrap();

        assert_eq!(report.commits, 0);
        assert!(report.pushed.is_none());
        assert_eq!(store.push_attempts(), 0);
        assert_eq!(engine.stats().passes_completed, 1);
        assert_eq!(engine.phase(), EnginePhase::Idle);
    }

    #[test]
    fn phase_guard_rejects_overlap() {
        let (_store, engine) = engine(RetryConfig::no_retry());
        let guard = engine.enter(EnginePhase::Syncing).unwrap();
        assert!(matches!(
            engine.enter(EnginePhase::Pulling),
            Err(EngineError::Busy {
                phase: EnginePhase::Syncing
            })
        ));
        drop(guard);
        assert_eq!(engine.phase(), EnginePhase::Idle);
    }
}
