//! Global sync state.

use crate::error::CoreResult;
use crate::layout::{decode_record, encode_record, read_through, STATE_PATH};
use crate::types::SCHEMA_VERSION;
use chrono::{DateTime, Utc};
use docsync_store::{Store, Transaction};
use serde::{Deserialize, Serialize};

/// The single global bookkeeping record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Folder names content has been written to.
    #[serde(default)]
    pub folders: Vec<String>,
    /// Start of the last completed discovery scan.
    #[serde(default)]
    pub last_pull_time: Option<DateTime<Utc>>,
    /// Oldest edit time enqueued by the last discovery scan.
    #[serde(default)]
    pub oldest_pull_result: Option<DateTime<Utc>>,
    /// Record schema version.
    #[serde(default = "default_schema")]
    pub schema_version: u32,
}

fn default_schema() -> u32 {
    SCHEMA_VERSION
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            last_pull_time: None,
            oldest_pull_result: None,
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl SyncState {
    /// Loads the state, or the default state if none was saved yet.
    pub fn load(store: &dyn Store) -> CoreResult<Self> {
        Self::load_in(store, None)
    }

    /// Loads the state as seen through a pending transaction.
    pub fn load_in(store: &dyn Store, view: Option<&Transaction>) -> CoreResult<Self> {
        match read_through(store, view, STATE_PATH)? {
            Some(bytes) => decode_record(STATE_PATH, &bytes),
            None => Ok(Self::default()),
        }
    }

    /// Stages the state in `tx`.
    pub fn save(&self, tx: &mut Transaction) -> CoreResult<()> {
        tx.write(STATE_PATH, encode_record(self)?)?;
        Ok(())
    }

    /// Records `folder` as known. Returns true if it was new.
    pub fn add_folder(&mut self, folder: &str) -> bool {
        if self.folders.iter().any(|f| f == folder) {
            return false;
        }
        self.folders.push(folder.to_string());
        self.folders.sort();
        true
    }
}
