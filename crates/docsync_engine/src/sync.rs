//! Draining the work queue into rendered files.
//!
//! Each queued item is one unit of work: every file and record it
//! touches, including the trimmed queue record, is staged in a single
//! transaction and applied together. A crash between units therefore
//! loses at most the unit in flight, which is retried on the next run.

use crate::config::SyncLimits;
use crate::engine::{EnginePhase, SyncEngine};
use crate::error::EngineResult;
use crate::tree::{child_entities, fetch_rows, fetch_tree};
use chrono::Utc;
use docsync_core::{
    content_hash, render, Block, BlockKind, Entity, EntityId, EntityKind, FileRegistry,
    PageRegistry, QueueClass, QueueEntry, QueueItem, QueueType, RemoteSource, RenderOptions,
    SyncState, SCHEMA_VERSION,
};
use docsync_store::{Staged, Transaction};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Options for a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Re-render items even when the remote reports no newer edit.
    pub force: bool,
    /// Limits for this run; the configured limits when `None`.
    pub limits: Option<SyncLimits>,
}

impl SyncOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces re-rendering.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Overrides the configured limits.
    #[must_use]
    pub fn with_limits(mut self, limits: SyncLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Why a sync run stopped before the queue was empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Entity fetch limit reached.
    MaxEntities,
    /// File write limit reached.
    MaxFiles,
    /// Queue record limit reached.
    MaxRecords,
    /// Duration limit reached.
    MaxDuration,
    /// The cancellation token fired.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::MaxEntities => "entity limit reached",
            StopReason::MaxFiles => "file limit reached",
            StopReason::MaxRecords => "record limit reached",
            StopReason::MaxDuration => "time limit reached",
            StopReason::Cancelled => "cancelled",
        })
    }
}

/// Running counters of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncProgress {
    /// Units of work finished (synced, skipped or dropped).
    pub units: u64,
    /// Entities fetched from the remote.
    pub entities_fetched: u64,
    /// Markup and asset files written.
    pub files_written: u64,
    /// Queue records fully consumed.
    pub records_consumed: u64,
    /// Items skipped because the local copy was current.
    pub items_skipped: u64,
    /// Items dropped after a permanent remote failure.
    pub items_dropped: u64,
    /// Time since the run started.
    pub elapsed: Duration,
}

/// Summary of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Final counters.
    pub progress: SyncProgress,
    /// Set when the run stopped early.
    pub stop_reason: Option<StopReason>,
}

impl SyncReport {
    /// Returns true if the queue was drained.
    pub fn is_complete(&self) -> bool {
        self.stop_reason.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Synced,
    Skipped,
}

fn exhausted(
    limits: &SyncLimits,
    progress: &SyncProgress,
    cancel: &CancellationToken,
) -> Option<StopReason> {
    let over = |limit: Option<u64>, value: u64| limit.is_some_and(|max| value >= max);
    if cancel.is_cancelled() {
        Some(StopReason::Cancelled)
    } else if over(limits.max_entities, progress.entities_fetched) {
        Some(StopReason::MaxEntities)
    } else if over(limits.max_files, progress.files_written) {
        Some(StopReason::MaxFiles)
    } else if over(limits.max_records, progress.records_consumed) {
        Some(StopReason::MaxRecords)
    } else if limits.max_duration.is_some_and(|max| progress.elapsed >= max) {
        Some(StopReason::MaxDuration)
    } else {
        None
    }
}

/// Lowercase, dash-separated form of a title for file names.
pub(crate) fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug: String = slug.chars().take(60).collect();
    if slug.is_empty() {
        "untitled".into()
    } else {
        slug.trim_end_matches('-').to_string()
    }
}

/// File extension, with the dot, taken from a URL or file name.
fn extension(name: &str) -> String {
    let path = name.split(['?', '#']).next().unwrap_or_default();
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}

impl<R: RemoteSource> SyncEngine<R> {
    /// Drains the work queue.
    pub fn sync(&self, options: &SyncOptions, cancel: &CancellationToken) -> EngineResult<SyncReport> {
        self.sync_with_progress(options, cancel, &mut |_: &SyncProgress| {})
    }

    /// Drains the work queue, reporting progress after every unit of work.
    ///
    /// Records are taken in queue order and re-listed after each one, so
    /// records created meanwhile (child discoveries, webhook events) are
    /// picked up in the same run. Limits are checked before every unit.
    ///
    /// An item failing with a permanent remote error is dropped. Any
    /// other failure ends the run with the error; the failing item stays
    /// queued.
    pub fn sync_with_progress(
        &self,
        options: &SyncOptions,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(&SyncProgress),
    ) -> EngineResult<SyncReport> {
        let _guard = self.enter(EnginePhase::Syncing)?;
        let limits = options.limits.as_ref().unwrap_or(&self.config.limits);
        let started = Instant::now();
        let mut progress = SyncProgress::default();
        let mut unreadable: HashSet<u64> = HashSet::new();
        let mut stop_reason = None;

        let result = (|| -> EngineResult<()> {
            'records: loop {
                let Some(record_id) = self
                    .queue
                    .list()?
                    .into_iter()
                    .find(|id| !unreadable.contains(id))
                else {
                    break;
                };

                let mut entry = match self.queue.read(record_id) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(record = record_id, error = %e, "skipping unreadable queue record");
                        unreadable.insert(record_id);
                        continue;
                    }
                };
                if entry.is_empty() {
                    let mut tx = self.store.begin_tx();
                    self.queue.delete(&mut tx, record_id)?;
                    self.store.apply(tx)?;
                    continue;
                }

                while !entry.items.is_empty() {
                    progress.elapsed = started.elapsed();
                    if let Some(reason) = exhausted(limits, &progress, cancel) {
                        stop_reason = Some(reason);
                        break 'records;
                    }

                    let item = entry.items[0].clone();
                    let mut tx = self.store.begin_tx();
                    match self.process_item(&mut tx, &entry, &item, options, &mut progress) {
                        Ok(ItemOutcome::Synced) => {}
                        Ok(ItemOutcome::Skipped) => progress.items_skipped += 1,
                        Err(e) if e.is_permanent_remote() => {
                            tracing::warn!(entity = %item.id, error = %e, "dropping queue item");
                            progress.items_dropped += 1;
                            tx = self.store.begin_tx();
                        }
                        Err(e) => {
                            tracing::error!(entity = %item.id, error = %e, "sync failed; item stays queued");
                            return Err(e);
                        }
                    }

                    entry.items.remove(0);
                    self.queue.update(&mut tx, record_id, &entry)?;
                    self.store.apply(tx)?;

                    progress.units += 1;
                    progress.elapsed = started.elapsed();
                    on_progress(&progress);
                }
                progress.records_consumed += 1;
                tracing::debug!(record = record_id, "queue record consumed");
            }
            Ok(())
        })();

        progress.elapsed = started.elapsed();
        self.record_units(&progress);
        result?;

        tracing::info!(
            units = progress.units,
            fetched = progress.entities_fetched,
            files = progress.files_written,
            skipped = progress.items_skipped,
            dropped = progress.items_dropped,
            stop = ?stop_reason,
            "sync run finished"
        );
        Ok(SyncReport {
            progress,
            stop_reason,
        })
    }

    fn process_item(
        &self,
        tx: &mut Transaction,
        entry: &QueueEntry,
        item: &QueueItem,
        options: &SyncOptions,
        progress: &mut SyncProgress,
    ) -> EngineResult<ItemOutcome> {
        if self.under_disabled_root(&item.id, entry.parent_id.as_ref())? {
            tracing::debug!(entity = %item.id, "skipping item below a disabled root");
            return Ok(ItemOutcome::Skipped);
        }
        let existing = self.registries.load_page(&item.id)?;

        if !options.force {
            if let Some(registry) = &existing {
                if entry.kind == QueueType::Init {
                    tracing::debug!(entity = %item.id, "already initialized");
                    return Ok(ItemOutcome::Skipped);
                }
                if item.last_edited.is_some_and(|t| t <= registry.last_edited) {
                    tracing::debug!(entity = %item.id, "local copy is current");
                    return Ok(ItemOutcome::Skipped);
                }
            }
        }

        let entity = self.remote.fetch_entity(&item.id)?;
        progress.entities_fetched += 1;

        if entity.archived {
            tracing::debug!(entity = %entity.id, "skipping archived entity");
            return Ok(ItemOutcome::Skipped);
        }
        if !options.force {
            if let Some(registry) = &existing {
                if entity.last_edited <= registry.last_edited {
                    tracing::debug!(entity = %entity.id, "remote has no newer edit");
                    return Ok(ItemOutcome::Skipped);
                }
            }
        }

        let is_root = self.config.root(&entity.id).is_some();
        let parent_hint = if is_root {
            None
        } else {
            entry.parent_id.clone().or_else(|| entity.parent_id.clone())
        };
        if existing.is_none()
            && !self.ensure_ancestors(&entity.id, parent_hint.clone(), &entry.folder, progress)?
        {
            tracing::debug!(entity = %entity.id, "ancestors reach a disabled root");
            return Ok(ItemOutcome::Skipped);
        }

        self.materialize(tx, entity, &entry.folder, existing, parent_hint, progress)?;
        Ok(ItemOutcome::Synced)
    }

    /// Returns true if `id` is a disabled root or its registry parent
    /// chain reaches one.
    ///
    /// `parent_hint` stands in for the parent of an entity that has no
    /// registry yet. The walk is bounded by `max_ancestor_depth` and stops
    /// at cycles and enabled roots.
    pub(crate) fn under_disabled_root(
        &self,
        id: &EntityId,
        parent_hint: Option<&EntityId>,
    ) -> EngineResult<bool> {
        if self.config.roots.iter().all(|r| r.enabled) {
            return Ok(false);
        }
        let mut seen = HashSet::new();
        let mut current = id.clone();
        let mut hint = parent_hint.cloned();
        loop {
            if self.config.is_disabled_root(&current) {
                return Ok(true);
            }
            if self.config.root(&current).is_some()
                || seen.len() > self.config.max_ancestor_depth
                || !seen.insert(current.clone())
            {
                return Ok(false);
            }
            let first_parent = hint.take();
            let parent = match self.registries.load_page(&current)? {
                Some(registry) => registry.parent_id,
                None => first_parent,
            };
            match parent {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
    }

    /// Materializes missing ancestors of `id`, topmost first, each in its
    /// own unit of work.
    ///
    /// The walk stops at the first registered ancestor, at an ancestor the
    /// remote does not expose, at a cycle, or after `max_ancestor_depth`
    /// steps. Returns false, having written nothing, if the chain reaches
    /// a disabled root.
    fn ensure_ancestors(
        &self,
        id: &EntityId,
        parent: Option<EntityId>,
        folder: &str,
        progress: &mut SyncProgress,
    ) -> EngineResult<bool> {
        let mut seen = HashSet::from([id.clone()]);
        let mut chain: Vec<Entity> = Vec::new();
        let mut next = parent;

        while let Some(parent_id) = next.take() {
            if chain.len() >= self.config.max_ancestor_depth {
                tracing::warn!(entity = %id, depth = chain.len(), "ancestor depth limit reached");
                break;
            }
            if !seen.insert(parent_id.clone()) {
                tracing::warn!(entity = %id, ancestor = %parent_id, "ancestor cycle detected");
                break;
            }
            if self.registries.load_page(&parent_id)?.is_some() {
                if self.under_disabled_root(&parent_id, None)? {
                    return Ok(false);
                }
                break;
            }
            if self.config.is_disabled_root(&parent_id) {
                return Ok(false);
            }
            let parent = match self.remote.fetch_entity(&parent_id) {
                Ok(parent) => parent,
                Err(e) if e.is_permanent() => {
                    tracing::debug!(ancestor = %parent_id, error = %e, "ancestor not available");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            progress.entities_fetched += 1;
            if self.config.root(&parent.id).is_none() {
                next = parent.parent_id.clone();
            }
            chain.push(parent);
        }

        for ancestor in chain.into_iter().rev() {
            tracing::debug!(entity = %id, ancestor = %ancestor.id, "materializing ancestor");
            let parent = ancestor.parent_id.clone();
            let mut tx = self.store.begin_tx();
            self.materialize(&mut tx, ancestor, folder, None, parent, progress)?;
            self.store.apply(tx)?;
        }
        Ok(true)
    }

    /// Renders `entity` and stages its file, registry, assets, users and
    /// child discoveries.
    fn materialize(
        &self,
        tx: &mut Transaction,
        mut entity: Entity,
        folder: &str,
        existing: Option<PageRegistry>,
        parent_hint: Option<EntityId>,
        progress: &mut SyncProgress,
    ) -> EngineResult<()> {
        let root = self.config.root(&entity.id);
        let is_root = root.is_some();
        let folder = match (root, &existing) {
            (Some(root), _) => root.folder.clone(),
            (None, Some(registry)) => registry.folder.clone(),
            (None, None) => folder.to_string(),
        };
        let parent_id = if is_root { None } else { parent_hint };
        if let Some(root) = root.filter(|r| r.kind != entity.kind) {
            tracing::debug!(entity = %entity.id, remote = %entity.kind, configured = %root.kind, "using configured root kind");
            entity.kind = root.kind;
        }

        let (blocks, children) = match entity.kind {
            EntityKind::Page => {
                let blocks = fetch_tree(&self.remote, &entity.id, self.config.max_depth)?;
                let children: Vec<QueueItem> = child_entities(&blocks)
                    .into_iter()
                    .map(|id| QueueItem::new(id, None))
                    .collect();
                (blocks, children)
            }
            EntityKind::Database => {
                let rows = fetch_rows(&self.remote, &entity.id)?;
                let blocks = rows
                    .iter()
                    .map(|row| Block::new(row.id.clone(), BlockKind::ChildPage, row.title.clone()))
                    .collect();
                let children = rows
                    .into_iter()
                    .map(|row| QueueItem::new(row.id, Some(row.last_edited)))
                    .collect();
                (blocks, children)
            }
        };

        for user in [entity.created_by.as_mut(), entity.last_edited_by.as_mut()]
            .into_iter()
            .flatten()
        {
            self.registries.resolve_user(tx, user, &self.remote)?;
        }

        let mut options = RenderOptions::new(folder.clone())
            .with_root(is_root)
            .with_parent(parent_id.clone());
        self.stage_assets(tx, &blocks, &entity.id, &folder, &mut options, progress)?;

        let bytes = render(&entity, &blocks, &options)?;
        let hash = content_hash(&bytes);
        let file_path = match &existing {
            Some(registry) => registry.file_path.clone(),
            None => self.assign_path(tx, &folder, &entity)?,
        };

        let unchanged = existing
            .as_ref()
            .is_some_and(|r| r.content_hash == hash && r.file_path == file_path);
        let registry = PageRegistry {
            id: entity.id.clone(),
            kind: entity.kind,
            folder: folder.clone(),
            file_path: file_path.clone(),
            title: entity.title.clone(),
            last_edited: entity.last_edited,
            last_synced: match &existing {
                Some(r) if unchanged => r.last_synced,
                _ => Utc::now(),
            },
            is_root,
            parent_id,
            children: children.iter().map(|c| c.id.clone()).collect(),
            content_hash: hash,
            schema_version: SCHEMA_VERSION,
        };

        if !unchanged || !self.store.exists(&file_path)? {
            tx.write(&file_path, bytes)?;
            progress.files_written += 1;
        }
        if existing.as_ref() != Some(&registry) {
            self.registries.save_page(tx, &registry)?;
        }
        tracing::info!(entity = %entity.id, kind = %entity.kind, path = %file_path, unchanged, "materialized");

        self.queue_children(tx, &entity.id, &folder, children)?;

        let mut state = SyncState::load_in(self.store.as_ref(), Some(&*tx))?;
        if state.add_folder(&folder) {
            state.save(tx)?;
        }
        Ok(())
    }

    /// Picks a file path for a newly seen entity.
    ///
    /// The short id suffix keeps names unique across equal titles; the
    /// full id is used if the short name is already taken.
    fn assign_path(&self, tx: &Transaction, folder: &str, entity: &Entity) -> EngineResult<String> {
        let slug = slugify(&entity.title);
        let id = entity.id.as_str();
        let short = id.char_indices().nth(8).map_or(id, |(end, _)| &id[..end]);
        let candidate = format!("{folder}/{slug}-{short}.md");

        let taken = match tx.lookup(&candidate) {
            Some(Staged::Written(_)) => true,
            Some(Staged::Deleted) => false,
            None => self.store.exists(&candidate)?,
        };
        if taken && short != id {
            Ok(format!("{folder}/{slug}-{id}.md"))
        } else {
            Ok(candidate)
        }
    }

    /// Downloads images and files that have no registry yet and maps
    /// every asset URL to a link relative to the folder.
    fn stage_assets(
        &self,
        tx: &mut Transaction,
        blocks: &[Block],
        page: &EntityId,
        folder: &str,
        options: &mut RenderOptions,
        progress: &mut SyncProgress,
    ) -> EngineResult<()> {
        for block in blocks {
            let (url, name) = match &block.kind {
                BlockKind::Image { url } => (url, url.as_str()),
                BlockKind::File { url, name } => (url, name.as_str()),
                _ => {
                    self.stage_assets(tx, &block.children, page, folder, options, progress)?;
                    continue;
                }
            };

            let path = match self.registries.load_file_in(&block.id, Some(&*tx))? {
                Some(registry) => registry.file_path,
                None => {
                    let bytes = match self.remote.download(url) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::warn!(page = %page, asset = %block.id, error = %e, "asset download failed");
                            continue;
                        }
                    };
                    let mut ext = extension(name);
                    if ext.is_empty() {
                        ext = extension(url);
                    }
                    let path = format!("{folder}/{}/{}{ext}", self.config.asset_dir, block.id);
                    tx.write(&path, bytes)?;
                    progress.files_written += 1;
                    self.registries.save_file(
                        tx,
                        &FileRegistry {
                            id: block.id.clone(),
                            file_path: path.clone(),
                            source_url: url.clone(),
                            last_synced: Utc::now(),
                            page_id: Some(page.clone()),
                            schema_version: SCHEMA_VERSION,
                        },
                    )?;
                    path
                }
            };

            let link = path
                .strip_prefix(folder)
                .and_then(|p| p.strip_prefix('/'))
                .unwrap_or(&path)
                .to_string();
            options.assets.insert(url.clone(), link);
        }
        Ok(())
    }

    /// Queues children that are unknown locally, or newer remotely than
    /// their registry says.
    fn queue_children(
        &self,
        tx: &mut Transaction,
        parent: &EntityId,
        folder: &str,
        children: Vec<QueueItem>,
    ) -> EngineResult<()> {
        let mut init = Vec::new();
        let mut update = Vec::new();
        for child in children {
            match self.registries.load_page_in(&child.id, Some(&*tx))? {
                None => {
                    if !self.queue.is_queued(&child.id, QueueType::Init)? {
                        init.push(child);
                    }
                }
                Some(registry) => {
                    if child.last_edited.is_some_and(|t| t > registry.last_edited) {
                        update.push(child);
                    }
                }
            }
        }

        for (kind, items) in [(QueueType::Init, init), (QueueType::Update, update)] {
            if items.is_empty() {
                continue;
            }
            tracing::debug!(parent = %parent, %kind, children = items.len(), "queueing children");
            let entry = QueueEntry::new(kind, folder, items).with_parent(parent.clone());
            self.queue.create(tx, entry, QueueClass::Batch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_titles() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Spaces  and--dashes "), "spaces-and-dashes");
        assert_eq!(slugify("Ünïcode Títle"), "ünïcode-títle");
        assert_eq!(slugify("!!!"), "untitled");
        assert_eq!(slugify(""), "untitled");
    }

    #[test]
    fn extensions_from_urls_and_names() {
        assert_eq!(extension("https://cdn.example.com/a/b/photo.PNG?sig=abc"), ".png");
        assert_eq!(extension("report.pdf"), ".pdf");
        assert_eq!(extension("https://example.com/download"), "");
        assert_eq!(extension(".hidden"), "");
        assert_eq!(extension("archive.toolongext"), "");
    }

    #[test]
    fn limits_trip_in_order() {
        let cancel = CancellationToken::new();
        let limits = SyncLimits::new().with_max_entities(2).with_max_records(1);
        let mut progress = SyncProgress::default();
        assert_eq!(exhausted(&limits, &progress, &cancel), None);

        progress.records_consumed = 1;
        assert_eq!(exhausted(&limits, &progress, &cancel), Some(StopReason::MaxRecords));

        progress.entities_fetched = 2;
        assert_eq!(exhausted(&limits, &progress, &cancel), Some(StopReason::MaxEntities));

        cancel.cancel();
        assert_eq!(exhausted(&limits, &progress, &cancel), Some(StopReason::Cancelled));
    }

    #[test]
    fn duration_limit() {
        let limits = SyncLimits::new().with_max_duration(Duration::from_secs(1));
        let progress = SyncProgress {
            elapsed: Duration::from_secs(2),
            ..SyncProgress::default()
        };
        assert_eq!(
            exhausted(&limits, &progress, &CancellationToken::new()),
            Some(StopReason::MaxDuration)
        );
    }
}
