//! Per-entity registries.
//!
//! Registries record what has been materialized: where a page lives, when
//! it was last edited remotely and synced locally, and what it links to.
//! They make re-runs idempotent and let cleanup find orphans.
//!
//! Records live at `.docsync/registry/<kind>-<id>.json`. Records written by
//! older versions at `.docsync/registry/<id>.json` are still read, and are
//! replaced by the current path the next time they are saved.

use crate::error::CoreResult;
use crate::id::{self, EntityId};
use crate::layout::{decode_record, encode_record, read_through, REGISTRY_DIR};
use crate::remote::{RemoteSource, UserRef};
use crate::types::{EntityKind, UserKind, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use docsync_store::{Store, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

const FILE_PREFIX: &str = "file";
const USER_PREFIX: &str = "user";

fn default_schema() -> u32 {
    SCHEMA_VERSION
}

/// Hex SHA-256 of materialized bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Metadata of one tracked page or database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRegistry {
    /// Entity id.
    pub id: EntityId,
    /// Page or database.
    #[serde(default)]
    pub kind: EntityKind,
    /// Content folder.
    pub folder: String,
    /// Store path of the markup file. Assigned once, never changed.
    pub file_path: String,
    /// Current display title.
    pub title: String,
    /// Remote edit time of the materialized version.
    pub last_edited: DateTime<Utc>,
    /// Local time of the last successful write.
    pub last_synced: DateTime<Utc>,
    /// True for configured roots.
    #[serde(default)]
    pub is_root: bool,
    /// Parent entity; `None` for roots.
    #[serde(default, with = "id::optional")]
    pub parent_id: Option<EntityId>,
    /// Child entities in content order (best-effort).
    #[serde(default)]
    pub children: Vec<EntityId>,
    /// Hex SHA-256 of the materialized file.
    #[serde(default)]
    pub content_hash: String,
    /// Record schema version.
    #[serde(default = "default_schema")]
    pub schema_version: u32,
}

/// Metadata of one downloaded asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRegistry {
    /// Asset id.
    pub id: EntityId,
    /// Store path of the asset.
    pub file_path: String,
    /// URL the asset was downloaded from.
    pub source_url: String,
    /// Local time of the download.
    pub last_synced: DateTime<Utc>,
    /// Page that embeds the asset.
    #[serde(default, with = "id::optional")]
    pub page_id: Option<EntityId>,
    /// Record schema version.
    #[serde(default = "default_schema")]
    pub schema_version: u32,
}

/// Cached remote user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegistry {
    /// User id.
    pub id: EntityId,
    /// Display name.
    pub name: String,
    /// Account kind.
    #[serde(default)]
    pub kind: UserKind,
    /// Contact address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Record schema version.
    #[serde(default = "default_schema")]
    pub schema_version: u32,
}

impl UserRegistry {
    /// Copies the cached fields into a reference.
    pub fn fill(&self, user: &mut UserRef) {
        user.name = Some(self.name.clone());
        user.kind = Some(self.kind);
        user.email.clone_from(&self.email);
    }
}

/// Access to every registry kind over one store.
#[derive(Clone)]
pub struct Registries {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries").finish_non_exhaustive()
    }
}

impl Registries {
    /// Creates registry access over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Store path of a page or database registry.
    #[must_use]
    pub fn page_path(kind: EntityKind, id: &EntityId) -> String {
        record_path(kind.as_str(), id)
    }

    /// Store path used by older versions for page registries.
    #[must_use]
    pub fn legacy_page_path(id: &EntityId) -> String {
        format!("{REGISTRY_DIR}/{id}.json")
    }

    /// Store path of a file registry.
    #[must_use]
    pub fn file_path(id: &EntityId) -> String {
        record_path(FILE_PREFIX, id)
    }

    /// Store path of a user registry.
    #[must_use]
    pub fn user_path(id: &EntityId) -> String {
        record_path(USER_PREFIX, id)
    }

    // --- pages ---

    /// Stages `registry` at its current path.
    ///
    /// Copies at the other kind's path or the legacy path are removed.
    pub fn save_page(&self, tx: &mut Transaction, registry: &PageRegistry) -> CoreResult<()> {
        let path = Self::page_path(registry.kind, &registry.id);
        let other = match registry.kind {
            EntityKind::Page => EntityKind::Database,
            EntityKind::Database => EntityKind::Page,
        };
        for stale in [
            Self::page_path(other, &registry.id),
            Self::legacy_page_path(&registry.id),
        ] {
            if read_through(self.store.as_ref(), Some(&*tx), &stale)?.is_some() {
                tx.delete(&stale)?;
            }
        }
        tx.write(&path, encode_record(registry)?)?;
        Ok(())
    }

    /// Loads a page or database registry.
    pub fn load_page(&self, id: &EntityId) -> CoreResult<Option<PageRegistry>> {
        self.load_page_in(id, None)
    }

    /// Loads a page or database registry as seen through `view`.
    ///
    /// Tries the page path, then the database path, then the legacy path.
    pub fn load_page_in(
        &self,
        id: &EntityId,
        view: Option<&Transaction>,
    ) -> CoreResult<Option<PageRegistry>> {
        for path in [
            Self::page_path(EntityKind::Page, id),
            Self::page_path(EntityKind::Database, id),
            Self::legacy_page_path(id),
        ] {
            if let Some(registry) = self.load(&path, view)? {
                return Ok(Some(registry));
            }
        }
        Ok(None)
    }

    /// Lists every page and database registry, sorted by id.
    ///
    /// Unreadable or corrupt records are skipped with a warning.
    pub fn list_pages(&self) -> CoreResult<Vec<PageRegistry>> {
        let mut found: BTreeMap<EntityId, (bool, PageRegistry)> = BTreeMap::new();
        for path in self.store.list(REGISTRY_DIR)? {
            let Some(stem) = record_stem(&path) else {
                continue;
            };
            let legacy = match stem.split_once('-') {
                Some((prefix, _)) if prefix == "page" || prefix == "database" => false,
                Some(_) => continue,
                None => true,
            };
            let Some(registry) = self.load_lenient::<PageRegistry>(&path) else {
                continue;
            };
            // Current-scheme records shadow legacy copies.
            match found.get(&registry.id) {
                Some((false, _)) if legacy => {}
                _ => {
                    found.insert(registry.id.clone(), (legacy, registry));
                }
            }
        }
        Ok(found.into_values().map(|(_, r)| r).collect())
    }

    /// Stages deletion of a page registry at every path it may occupy.
    pub fn delete_page(&self, tx: &mut Transaction, id: &EntityId) -> CoreResult<()> {
        for path in [
            Self::page_path(EntityKind::Page, id),
            Self::page_path(EntityKind::Database, id),
            Self::legacy_page_path(id),
        ] {
            if read_through(self.store.as_ref(), Some(&*tx), &path)?.is_some() {
                tx.delete(&path)?;
            }
        }
        Ok(())
    }

    // --- files ---

    /// Stages a file registry.
    pub fn save_file(&self, tx: &mut Transaction, registry: &FileRegistry) -> CoreResult<()> {
        tx.write(&Self::file_path(&registry.id), encode_record(registry)?)?;
        Ok(())
    }

    /// Loads a file registry.
    pub fn load_file(&self, id: &EntityId) -> CoreResult<Option<FileRegistry>> {
        self.load(&Self::file_path(id), None)
    }

    /// Loads a file registry as seen through `view`.
    pub fn load_file_in(
        &self,
        id: &EntityId,
        view: Option<&Transaction>,
    ) -> CoreResult<Option<FileRegistry>> {
        self.load(&Self::file_path(id), view)
    }

    /// Lists every file registry, sorted by id. Corrupt records are skipped.
    pub fn list_files(&self) -> CoreResult<Vec<FileRegistry>> {
        Ok(self
            .store
            .list(REGISTRY_DIR)?
            .iter()
            .filter(|p| record_stem(p).is_some_and(|s| s.starts_with("file-")))
            .filter_map(|p| self.load_lenient::<FileRegistry>(p))
            .collect())
    }

    /// Stages deletion of a file registry.
    pub fn delete_file(&self, tx: &mut Transaction, id: &EntityId) -> CoreResult<()> {
        tx.delete(&Self::file_path(id))?;
        Ok(())
    }

    // --- users ---

    /// Stages a user registry.
    pub fn save_user(&self, tx: &mut Transaction, registry: &UserRegistry) -> CoreResult<()> {
        tx.write(&Self::user_path(&registry.id), encode_record(registry)?)?;
        Ok(())
    }

    /// Loads a user registry.
    pub fn load_user(&self, id: &EntityId) -> CoreResult<Option<UserRegistry>> {
        self.load(&Self::user_path(id), None)
    }

    /// Fills `user` from the cache, fetching and caching it on a miss.
    ///
    /// Returns true if the reference was filled. A failed remote lookup
    /// leaves the reference untouched and is only logged; local errors
    /// are returned.
    pub fn resolve_user(
        &self,
        tx: &mut Transaction,
        user: &mut UserRef,
        remote: &dyn RemoteSource,
    ) -> CoreResult<bool> {
        let path = Self::user_path(&user.id);
        if let Some(cached) = self.load::<UserRegistry>(&path, Some(&*tx))? {
            cached.fill(user);
            return Ok(true);
        }

        let fetched = match remote.fetch_user(&user.id) {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(user = %user.id, error = %e, "failed to resolve user");
                return Ok(false);
            }
        };

        let registry = UserRegistry {
            id: user.id.clone(),
            name: fetched.name,
            kind: fetched.kind,
            email: fetched.email,
            schema_version: SCHEMA_VERSION,
        };
        registry.fill(user);
        self.save_user(tx, &registry)?;
        tracing::debug!(user = %registry.id, "cached user");
        Ok(true)
    }

    fn load<T: DeserializeOwned>(
        &self,
        path: &str,
        view: Option<&Transaction>,
    ) -> CoreResult<Option<T>> {
        read_through(self.store.as_ref(), view, path)?
            .map(|bytes| decode_record(path, &bytes))
            .transpose()
    }

    fn load_lenient<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        match self.load(path, None) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(path, error = %e, "skipping unreadable registry");
                None
            }
        }
    }
}

fn record_path(prefix: &str, id: &EntityId) -> String {
    format!("{REGISTRY_DIR}/{prefix}-{id}.json")
}

fn record_stem(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(REGISTRY_DIR)?.strip_prefix('/')?;
    if rest.contains('/') {
        return None;
    }
    rest.strip_suffix(".json")
}
