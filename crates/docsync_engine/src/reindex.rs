//! Rebuilding page registries from the rendered files.

use crate::engine::{EnginePhase, SyncEngine};
use crate::error::EngineResult;
use chrono::Utc;
use docsync_core::{
    content_hash, parse_front_matter, EntityId, FrontMatter, PageRegistry, RemoteSource,
    SCHEMA_VERSION,
};
use std::collections::{BTreeMap, HashMap};

/// Summary of a reindex run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Markup files examined.
    pub scanned: u64,
    /// Files without a readable front-matter header.
    pub unparseable: u64,
    /// Registries written because they were missing or out of date.
    pub rebuilt: u64,
    /// Files removed because a newer file claimed the same id.
    pub duplicates_removed: u64,
    /// Registries removed because their file is gone.
    pub stale_removed: u64,
}

struct Candidate {
    path: String,
    header: FrontMatter,
    hash: String,
}

impl<R: RemoteSource> SyncEngine<R> {
    /// Rebuilds page registries from the front matter of rendered files.
    ///
    /// When two files claim the same id, the one with the newest
    /// `last_edited` wins and the other file is deleted; on a tie the
    /// path the registry already points at wins. Children lists are
    /// rebuilt from parent links. Registries whose file no longer exists
    /// are removed. All changes are committed together.
    pub fn reindex(&self) -> EngineResult<ReindexReport> {
        let _guard = self.enter(EnginePhase::Reindexing)?;

        let existing: HashMap<EntityId, PageRegistry> = self
            .registries
            .list_pages()?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let mut report = ReindexReport::default();
        let mut candidates: BTreeMap<EntityId, Vec<Candidate>> = BTreeMap::new();
        let asset_dir = format!("/{}/", self.config.asset_dir);

        for folder in self.known_folders()? {
            for path in self.store.list(&folder)? {
                if !path.ends_with(".md") || path.contains(&asset_dir) {
                    continue;
                }
                report.scanned += 1;
                let bytes = self.store.read(&path)?;
                match parse_front_matter(&bytes) {
                    Ok(header) => candidates.entry(header.id.clone()).or_default().push(Candidate {
                        path,
                        header,
                        hash: content_hash(&bytes),
                    }),
                    Err(e) => {
                        tracing::warn!(%path, error = %e, "skipping file without front matter");
                        report.unparseable += 1;
                    }
                }
            }
        }

        let mut tx = self.store.begin_tx();
        let mut winners: BTreeMap<EntityId, Candidate> = BTreeMap::new();
        for (id, mut claims) in candidates {
            let current = existing.get(&id).map(|r| r.file_path.as_str());
            claims.sort_by(|a, b| {
                b.header
                    .last_edited
                    .cmp(&a.header.last_edited)
                    .then_with(|| (Some(b.path.as_str()) == current).cmp(&(Some(a.path.as_str()) == current)))
                    .then_with(|| a.path.cmp(&b.path))
            });
            let mut claims = claims.into_iter();
            let Some(winner) = claims.next() else {
                continue;
            };
            for stale in claims {
                tracing::info!(entity = %id, kept = %winner.path, removed = %stale.path, "removing duplicate file");
                tx.delete(&stale.path)?;
                report.duplicates_removed += 1;
            }
            winners.insert(id, winner);
        }

        let mut children: HashMap<&EntityId, Vec<EntityId>> = HashMap::new();
        for (id, winner) in &winners {
            if let Some(parent) = &winner.header.parent_id {
                children.entry(parent).or_default().push(id.clone());
            }
        }

        for (id, winner) in &winners {
            let previous = existing.get(id);
            let linked = children.remove(id).unwrap_or_default();
            let registry = PageRegistry {
                id: id.clone(),
                kind: winner.header.kind,
                folder: winner.header.folder.clone(),
                file_path: winner.path.clone(),
                title: winner.header.title.clone(),
                last_edited: winner.header.last_edited,
                last_synced: previous.map_or_else(Utc::now, |p| p.last_synced),
                is_root: winner.header.is_root,
                parent_id: winner.header.parent_id.clone(),
                children: merge_children(previous.map(|p| p.children.as_slice()), linked),
                content_hash: winner.hash.clone(),
                schema_version: SCHEMA_VERSION,
            };
            if previous != Some(&registry) {
                self.registries.save_page(&mut tx, &registry)?;
                report.rebuilt += 1;
            }
        }

        for id in existing.keys().filter(|id| !winners.contains_key(*id)) {
            tracing::info!(entity = %id, "removing registry without a file");
            self.registries.delete_page(&mut tx, id)?;
            report.stale_removed += 1;
        }

        tracing::info!(
            scanned = report.scanned,
            rebuilt = report.rebuilt,
            duplicates = report.duplicates_removed,
            stale = report.stale_removed,
            unparseable = report.unparseable,
            "reindex finished"
        );
        if !tx.is_empty() {
            let message = format!(
                "reindex: rebuilt {} registries, removed {} duplicates",
                report.rebuilt, report.duplicates_removed
            );
            self.store.commit(tx, &message)?;
        }
        Ok(report)
    }
}

/// Keeps the previous order of children that are still linked and
/// appends newly linked ones in id order.
fn merge_children(previous: Option<&[EntityId]>, mut linked: Vec<EntityId>) -> Vec<EntityId> {
    linked.sort();
    let mut merged: Vec<EntityId> = previous
        .unwrap_or_default()
        .iter()
        .filter(|id| linked.contains(id))
        .cloned()
        .collect();
    for id in linked {
        if !merged.contains(&id) {
            merged.push(id);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_children_keeps_known_order() {
        let ids = |s: &[&str]| s.iter().map(|i| EntityId::new(i)).collect::<Vec<_>>();
        let previous = ids(&["c", "a", "gone"]);
        let merged = merge_children(Some(&previous), ids(&["a", "b", "c"]));
        assert_eq!(merged, ids(&["c", "a", "b"]));
        assert_eq!(merge_children(None, ids(&["b", "a"])), ids(&["a", "b"]));
    }
}
