//! Discovery of remote changes.

use crate::engine::{EnginePhase, SyncEngine};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use docsync_core::{
    Entity, EntityId, QueueClass, QueueEntry, QueueItem, QueueType, RemoteSource, SearchControl,
    SyncState, MAX_ITEMS_PER_RECORD,
};
use std::collections::{BTreeMap, HashSet};
use tokio_util::sync::CancellationToken;

/// Options for a discovery pass.
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Scan back to this time instead of the stored last pull time.
    pub cutoff: Option<DateTime<Utc>>,
    /// Queue entities that have no registry yet.
    pub include_untracked: bool,
    /// Count what would be queued without writing anything.
    pub dry_run: bool,
}

impl PullOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit cutoff.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    /// Includes untracked entities.
    #[must_use]
    pub fn with_untracked(mut self, include: bool) -> Self {
        self.include_untracked = include;
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Summary of a discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Distinct search results visited. A result seen again after a
    /// retried search is not counted twice.
    pub scanned: u64,
    /// Tracked entities queued for update.
    pub updates: u64,
    /// Untracked entities queued for initialization.
    pub inits: u64,
    /// Untracked entities left alone.
    pub untracked_skipped: u64,
    /// Entities left alone because they sit below a disabled root.
    pub disabled_skipped: u64,
    /// True if the scan stopped at the cutoff rather than running out.
    pub reached_cutoff: bool,
    /// Queue records written.
    pub records: u64,
    /// Nothing was written.
    pub dry_run: bool,
}

impl PullReport {
    /// Entities queued in total.
    pub fn queued(&self) -> u64 {
        self.updates + self.inits
    }
}

#[derive(Default)]
struct Discovered {
    updates: BTreeMap<String, Vec<QueueItem>>,
    inits: BTreeMap<String, Vec<QueueItem>>,
    oldest: Option<DateTime<Utc>>,
}

impl<R: RemoteSource> SyncEngine<R> {
    /// Scans recently edited entities and queues the ones that need work.
    ///
    /// Results arrive newest first. The scan stops at the first entity
    /// edited at or before the cutoff (explicit, or the stored last pull
    /// time) or at or before the oldest result of the previous pass.
    /// Tracked entities are queued for update in their registry's folder;
    /// untracked ones are queued for initialization in the default folder
    /// (or their root's folder) when `include_untracked` is set. Entities
    /// below a disabled root are never queued.
    ///
    /// Queue records and the updated sync state are committed together.
    pub fn pull(&self, options: &PullOptions, cancel: &CancellationToken) -> EngineResult<PullReport> {
        let _guard = self.enter(EnginePhase::Pulling)?;

        let state = SyncState::load(self.store.as_ref())?;
        let cutoff = options
            .cutoff
            .or(state.last_pull_time)
            .ok_or(EngineError::MissingCutoff)?;
        let floor = state.oldest_pull_result;
        let scan_started = Utc::now();

        let mut report = PullReport {
            dry_run: options.dry_run,
            ..PullReport::default()
        };
        let mut found = Discovered::default();
        let mut seen: HashSet<EntityId> = HashSet::new();
        let mut failure: Option<EngineError> = None;

        {
            let mut visit = |entity: Entity| -> SearchControl {
                if cancel.is_cancelled() {
                    failure = Some(EngineError::Cancelled);
                    return SearchControl::Stop;
                }
                let first_visit = seen.insert(entity.id.clone());
                if first_visit {
                    report.scanned += 1;
                }

                if entity.last_edited <= cutoff || floor.is_some_and(|f| entity.last_edited <= f) {
                    report.reached_cutoff = true;
                    return SearchControl::Stop;
                }
                if entity.archived || !first_visit {
                    return SearchControl::Continue;
                }

                match self.classify(&entity, options, &mut found, &mut report) {
                    Ok(()) => SearchControl::Continue,
                    Err(e) => {
                        failure = Some(e);
                        SearchControl::Stop
                    }
                }
            };
            self.remote.search(&self.config.search_query, &mut visit)?;
        }
        if let Some(e) = failure {
            return Err(e);
        }

        tracing::info!(
            scanned = report.scanned,
            updates = report.updates,
            inits = report.inits,
            disabled_skipped = report.disabled_skipped,
            reached_cutoff = report.reached_cutoff,
            %cutoff,
            dry_run = options.dry_run,
            "discovery finished"
        );
        if options.dry_run {
            return Ok(report);
        }

        let mut tx = self.store.begin_tx();
        for (kind, groups) in [
            (QueueType::Update, &found.updates),
            (QueueType::Init, &found.inits),
        ] {
            for (folder, items) in groups {
                let entry = QueueEntry::new(kind, folder.clone(), items.clone());
                self.queue.create(&mut tx, entry, QueueClass::Batch)?;
                report.records += items.len().div_ceil(MAX_ITEMS_PER_RECORD) as u64;
            }
        }

        let mut state = SyncState::load_in(self.store.as_ref(), Some(&tx))?;
        state.last_pull_time = Some(scan_started);
        if let Some(oldest) = found.oldest {
            state.oldest_pull_result = Some(oldest);
        }
        for folder in found.updates.keys().chain(found.inits.keys()) {
            state.add_folder(folder);
        }
        state.save(&mut tx)?;

        let message = format!("pull: queued {} entities", report.queued());
        self.store.commit(tx, &message)?;
        Ok(report)
    }

    /// Queues an `init` for every enabled root that has no registry and
    /// no pending `init`, ahead of all batch work. Returns how many roots
    /// were queued.
    pub fn seed_roots(&self) -> EngineResult<u64> {
        let _guard = self.enter(EnginePhase::Pulling)?;

        let mut tx = self.store.begin_tx();
        let mut seeded = 0u64;
        for root in self.config.roots.iter().filter(|r| r.enabled) {
            if self.registries.load_page(&root.id)?.is_some()
                || self.queue.is_queued(&root.id, QueueType::Init)?
            {
                continue;
            }
            let item = QueueItem::new(root.id.clone(), None);
            let entry = QueueEntry::new(QueueType::Init, root.folder.clone(), vec![item]);
            self.queue.create(&mut tx, entry, QueueClass::Priority)?;
            tracing::info!(root = %root.id, folder = %root.folder, "queued root");
            seeded += 1;
        }

        if seeded > 0 {
            self.store.commit(tx, &format!("pull: queued {seeded} roots"))?;
        }
        Ok(seeded)
    }

    fn classify(
        &self,
        entity: &Entity,
        options: &PullOptions,
        found: &mut Discovered,
        report: &mut PullReport,
    ) -> EngineResult<()> {
        if self.under_disabled_root(&entity.id, entity.parent_id.as_ref())? {
            tracing::debug!(entity = %entity.id, "below a disabled root");
            report.disabled_skipped += 1;
            return Ok(());
        }
        let item = QueueItem::new(entity.id.clone(), Some(entity.last_edited));

        if let Some(registry) = self.registries.load_page(&entity.id)? {
            found.updates.entry(registry.folder).or_default().push(item);
            report.updates += 1;
        } else if options.include_untracked {
            if self.queue.is_queued(&entity.id, QueueType::Init)? {
                return Ok(());
            }
            let folder = self
                .config
                .root(&entity.id)
                .map_or_else(|| self.config.default_folder.clone(), |r| r.folder.clone());
            found.inits.entry(folder).or_default().push(item);
            report.inits += 1;
        } else {
            report.untracked_skipped += 1;
            return Ok(());
        }

        found.oldest = Some(
            found
                .oldest
                .map_or(entity.last_edited, |o| o.min(entity.last_edited)),
        );
        Ok(())
    }
}
