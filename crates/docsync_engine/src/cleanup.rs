//! Removal of content no longer reachable from an enabled root.

use crate::engine::{EnginePhase, SyncEngine};
use crate::error::EngineResult;
use docsync_core::{EntityId, PageRegistry, RemoteSource, SyncState};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Summary of a cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Registered pages that were reachable.
    pub reachable: u64,
    /// Page registries removed, with their files.
    pub orphan_pages: u64,
    /// Asset registries removed, with their files.
    pub orphan_assets: u64,
    /// Markup and asset files no registry refers to.
    pub stray_files: u64,
    /// Every path removed (or, in a dry run, that would be).
    pub removed_paths: Vec<String>,
    /// Nothing was written.
    pub dry_run: bool,
}

impl CleanupReport {
    /// Returns true if nothing needed removing.
    pub fn is_clean(&self) -> bool {
        self.removed_paths.is_empty()
    }
}

impl<R: RemoteSource> SyncEngine<R> {
    /// Removes pages that are no longer reachable from an enabled root.
    ///
    /// Reachability follows both the children recorded on each registry
    /// and the parent links pointing back at it. Disabled roots and their
    /// subtrees are unreachable. Orphaned page registries are removed with
    /// their markup file, asset registries of orphaned pages with their
    /// asset file, and markup or asset files in known folders that no
    /// registry refers to are removed as well. Everything happens in one
    /// commit; a dry run only reports.
    pub fn cleanup(&self, dry_run: bool) -> EngineResult<CleanupReport> {
        let _guard = self.enter(EnginePhase::CleaningUp)?;

        let pages = self.registries.list_pages()?;
        let files = self.registries.list_files()?;
        let reachable = self.reachable(&pages);

        let mut report = CleanupReport {
            reachable: reachable.len() as u64,
            dry_run,
            ..CleanupReport::default()
        };
        let mut tx = self.store.begin_tx();
        let mut removed: BTreeSet<String> = BTreeSet::new();

        for page in pages.iter().filter(|p| !reachable.contains(&p.id)) {
            tracing::info!(entity = %page.id, path = %page.file_path, "removing orphaned page");
            self.registries.delete_page(&mut tx, &page.id)?;
            if self.store.exists(&page.file_path)? {
                tx.delete(&page.file_path)?;
                removed.insert(page.file_path.clone());
            }
            report.orphan_pages += 1;
        }

        for file in &files {
            let orphaned = match &file.page_id {
                Some(page) => !reachable.contains(page),
                None => false,
            };
            if !orphaned {
                continue;
            }
            tracing::info!(asset = %file.id, path = %file.file_path, "removing orphaned asset");
            self.registries.delete_file(&mut tx, &file.id)?;
            if self.store.exists(&file.file_path)? {
                tx.delete(&file.file_path)?;
                removed.insert(file.file_path.clone());
            }
            report.orphan_assets += 1;
        }

        let referenced: HashSet<&str> = pages
            .iter()
            .map(|p| p.file_path.as_str())
            .chain(files.iter().map(|f| f.file_path.as_str()))
            .collect();
        for folder in self.known_folders()? {
            let asset_prefix = format!("{folder}/{}/", self.config.asset_dir);
            for path in self.store.list(&folder)? {
                let stray_markup = path.ends_with(".md") && !path.starts_with(&asset_prefix);
                let stray_asset = path.starts_with(&asset_prefix);
                if !(stray_markup || stray_asset) || referenced.contains(path.as_str()) {
                    continue;
                }
                if removed.insert(path.clone()) {
                    tracing::info!(%path, "removing unreferenced file");
                    tx.delete(&path)?;
                    report.stray_files += 1;
                }
            }
        }

        report.removed_paths = removed.into_iter().collect();
        tracing::info!(
            reachable = report.reachable,
            orphan_pages = report.orphan_pages,
            orphan_assets = report.orphan_assets,
            stray_files = report.stray_files,
            dry_run,
            "cleanup finished"
        );

        if dry_run {
            tx.rollback();
        } else if !tx.is_empty() {
            let message = format!(
                "cleanup: removed {} pages, {} assets, {} stray files",
                report.orphan_pages, report.orphan_assets, report.stray_files
            );
            self.store.commit(tx, &message)?;
        }
        Ok(report)
    }

    /// Ids of registered pages reachable from enabled roots.
    fn reachable(&self, pages: &[PageRegistry]) -> HashSet<EntityId> {
        let by_id: HashMap<&EntityId, &PageRegistry> = pages.iter().map(|p| (&p.id, p)).collect();
        let mut by_parent: HashMap<&EntityId, Vec<&EntityId>> = HashMap::new();
        for page in pages {
            if let Some(parent) = &page.parent_id {
                by_parent.entry(parent).or_default().push(&page.id);
            }
        }
        let disabled: HashSet<&EntityId> = self
            .config
            .roots
            .iter()
            .filter(|r| !r.enabled)
            .map(|r| &r.id)
            .collect();

        let mut reachable = HashSet::new();
        let mut pending: VecDeque<&EntityId> = VecDeque::new();
        for root in self.config.roots.iter().filter(|r| r.enabled) {
            if by_id.contains_key(&root.id) && reachable.insert(root.id.clone()) {
                pending.push_back(&root.id);
            }
        }

        while let Some(id) = pending.pop_front() {
            let recorded = by_id.get(id).map(|p| p.children.iter()).into_iter().flatten();
            let linked = by_parent.get(id).into_iter().flatten().copied();
            for child in recorded.chain(linked) {
                if disabled.contains(child) || !by_id.contains_key(child) {
                    continue;
                }
                if reachable.insert(child.clone()) {
                    pending.push_back(child);
                }
            }
        }
        reachable
    }

    /// Folders recorded in the sync state or configured.
    pub(crate) fn known_folders(&self) -> EngineResult<Vec<String>> {
        let state = SyncState::load(self.store.as_ref())?;
        let mut folders: BTreeSet<String> = state.folders.into_iter().collect();
        folders.extend(self.config.folders());
        Ok(folders.into_iter().collect())
    }
}
