//! Persisted work queue.
//!
//! Each record is a JSON file named by a fixed-width number. Numbering
//! encodes priority: real-time triggered records count down from
//! [`PRIORITY_THRESHOLD`], bulk discovery records count up from it, so an
//! ascending listing yields every priority record before any batch
//! record. The next number in each class is derived from the records on
//! disk; there is no counter file.
//!
//! A record is removed only once every item in it has been processed or
//! skipped. Partially processed records are rewritten with the remaining
//! items.

use crate::error::{CoreError, CoreResult};
use crate::id::{self, EntityId};
use crate::layout::{decode_record, encode_record, read_through, QUEUE_DIR};
use crate::types::{QueueClass, QueueType};
use chrono::{DateTime, Utc};
use docsync_store::{Staged, Store, StoreError, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// First batch-class record number; priority records are numbered below it.
pub const PRIORITY_THRESHOLD: u64 = 10_000_000;

/// Maximum work items stored in one record.
pub const MAX_ITEMS_PER_RECORD: usize = 50;

/// Largest record number representable in a file name.
const MAX_RECORD_NUMBER: u64 = 99_999_999;

/// One entity to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Entity id.
    pub id: EntityId,
    /// Remote edit time observed at discovery, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Creates an item.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, last_edited: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            last_edited,
        }
    }
}

/// A unit of pending work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawQueueEntry")]
pub struct QueueEntry {
    /// Requested work.
    #[serde(rename = "type")]
    pub kind: QueueType,
    /// Content folder the items belong to.
    pub folder: String,
    /// Items in processing order.
    #[serde(rename = "pages")]
    pub items: Vec<QueueItem>,
    /// Parent whose children these items are, for child-discovery batches.
    #[serde(with = "id::optional")]
    pub parent_id: Option<EntityId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(kind: QueueType, folder: impl Into<String>, items: Vec<QueueItem>) -> Self {
        Self {
            kind,
            folder: folder.into(),
            items,
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    /// Marks the entry as a child-discovery batch.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<EntityId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// Returns true if no items remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Accepted on-disk shapes of a queue record.
#[derive(Deserialize)]
struct RawQueueEntry {
    #[serde(rename = "type")]
    kind: QueueType,
    #[serde(default)]
    folder: String,
    #[serde(flatten)]
    work: RawWork,
    #[serde(default, with = "id::optional")]
    parent_id: Option<EntityId>,
    #[serde(default)]
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawWork {
    Current { pages: Vec<QueueItem> },
    Legacy { page_ids: Vec<String> },
}

impl From<RawQueueEntry> for QueueEntry {
    fn from(raw: RawQueueEntry) -> Self {
        let items = match raw.work {
            RawWork::Current { pages } => pages,
            RawWork::Legacy { page_ids } => page_ids
                .iter()
                .map(|id| QueueItem::new(id.as_str(), None))
                .collect(),
        };
        Self {
            kind: raw.kind,
            folder: raw.folder,
            items,
            parent_id: raw.parent_id,
            created_at: raw.created_at,
        }
    }
}

/// The persisted work queue.
///
/// Reads go to the store; mutations are staged in the caller's
/// transaction. Methods suffixed `_in` see a pending transaction's staged
/// records as well.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl Queue {
    /// Creates a queue over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Store path of record `id`.
    #[must_use]
    pub fn record_path(id: u64) -> String {
        format!("{QUEUE_DIR}/{id:08}.json")
    }

    /// Returns the class a record number belongs to.
    #[must_use]
    pub fn class_of(id: u64) -> QueueClass {
        if id < PRIORITY_THRESHOLD {
            QueueClass::Priority
        } else {
            QueueClass::Batch
        }
    }

    /// Lists pending record numbers in ascending order.
    pub fn list(&self) -> CoreResult<Vec<u64>> {
        self.list_in(None)
    }

    /// Lists pending record numbers, including records staged in `view`.
    pub fn list_in(&self, view: Option<&Transaction>) -> CoreResult<Vec<u64>> {
        let mut ids: BTreeSet<u64> = self
            .store
            .list(QUEUE_DIR)?
            .iter()
            .filter_map(|p| parse_record_name(p))
            .collect();

        if let Some(tx) = view {
            ids.extend(
                tx.written_under(QUEUE_DIR)
                    .iter()
                    .filter_map(|p| parse_record_name(p)),
            );
            ids.retain(|id| !matches!(tx.lookup(&Self::record_path(*id)), Some(Staged::Deleted)));
        }

        Ok(ids.into_iter().collect())
    }

    /// Reads record `id`.
    pub fn read(&self, id: u64) -> CoreResult<QueueEntry> {
        self.read_in(id, None)
    }

    /// Reads record `id` as seen through `view`.
    pub fn read_in(&self, id: u64, view: Option<&Transaction>) -> CoreResult<QueueEntry> {
        let path = Self::record_path(id);
        match read_through(self.store.as_ref(), view, &path)? {
            Some(bytes) => decode_record(&path, &bytes),
            None => Err(StoreError::not_found(path).into()),
        }
    }

    /// Stages `entry` as one or more records and returns the first number.
    ///
    /// Entries with more than [`MAX_ITEMS_PER_RECORD`] items are split; the
    /// chunks list in input order within their class.
    pub fn create(
        &self,
        tx: &mut Transaction,
        entry: QueueEntry,
        class: QueueClass,
    ) -> CoreResult<u64> {
        if entry.items.is_empty() {
            return Err(CoreError::invalid_operation("queue entry has no items"));
        }

        let chunks: Vec<Vec<QueueItem>> = entry
            .items
            .chunks(MAX_ITEMS_PER_RECORD)
            .map(<[QueueItem]>::to_vec)
            .collect();
        let count = chunks.len() as u64;

        let first = match class {
            QueueClass::Priority => {
                let last = self.next_priority_number(Some(&*tx))?;
                if last < count {
                    return Err(CoreError::QueueExhausted { class: "priority" });
                }
                last + 1 - count
            }
            QueueClass::Batch => {
                let first = self.next_batch_number(Some(&*tx))?;
                if first + count - 1 > MAX_RECORD_NUMBER {
                    return Err(CoreError::QueueExhausted { class: "batch" });
                }
                first
            }
        };

        for (offset, items) in chunks.into_iter().enumerate() {
            let record = QueueEntry {
                items,
                ..entry.clone()
            };
            let id = first + offset as u64;
            tx.write(&Self::record_path(id), encode_record(&record)?)?;
        }

        tracing::debug!(
            first,
            records = count,
            kind = %entry.kind,
            folder = %entry.folder,
            ?class,
            "queued work"
        );
        Ok(first)
    }

    /// Stages a rewrite of record `id`; an entry with no items deletes it.
    pub fn update(&self, tx: &mut Transaction, id: u64, entry: &QueueEntry) -> CoreResult<()> {
        if entry.is_empty() {
            return self.delete(tx, id);
        }
        tx.write(&Self::record_path(id), encode_record(entry)?)?;
        Ok(())
    }

    /// Stages deletion of record `id`.
    pub fn delete(&self, tx: &mut Transaction, id: u64) -> CoreResult<()> {
        tx.delete(&Self::record_path(id))?;
        Ok(())
    }

    /// Returns true if an `init` request for `entity` is already pending.
    ///
    /// `update` requests are never deduplicated, so this always returns
    /// false for [`QueueType::Update`]. Unreadable records are skipped.
    pub fn is_queued(&self, entity: &EntityId, kind: QueueType) -> CoreResult<bool> {
        if kind == QueueType::Update {
            return Ok(false);
        }
        for id in self.list()? {
            let entry = match self.read(id) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(record = id, error = %e, "skipping unreadable queue record");
                    continue;
                }
            };
            if entry.kind == QueueType::Init && entry.items.iter().any(|i| &i.id == entity) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Next free priority-class number: the lowest one in use minus one.
    pub fn next_priority_number(&self, view: Option<&Transaction>) -> CoreResult<u64> {
        let lowest = self
            .list_in(view)?
            .into_iter()
            .find(|id| *id < PRIORITY_THRESHOLD)
            .unwrap_or(PRIORITY_THRESHOLD);
        lowest
            .checked_sub(1)
            .filter(|n| *n > 0)
            .ok_or(CoreError::QueueExhausted { class: "priority" })
    }

    /// Next free batch-class number: the highest one in use plus one.
    pub fn next_batch_number(&self, view: Option<&Transaction>) -> CoreResult<u64> {
        let next = self
            .list_in(view)?
            .into_iter()
            .rev()
            .find(|id| *id >= PRIORITY_THRESHOLD)
            .map_or(PRIORITY_THRESHOLD, |id| id + 1);
        if next > MAX_RECORD_NUMBER {
            return Err(CoreError::QueueExhausted { class: "batch" });
        }
        Ok(next)
    }
}

fn parse_record_name(path: &str) -> Option<u64> {
    let name = path.rsplit('/').next()?;
    let digits = name.strip_suffix(".json")?;
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
