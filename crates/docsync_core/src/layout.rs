//! Bookkeeping layout and record encoding.
//!
//! ```text
//! .docsync/
//! ├─ state.json
//! ├─ queue/00000001.json ...
//! └─ registry/{page,database,file,user}-<id>.json
//! ```

use crate::error::{CoreError, CoreResult};
use docsync_store::{Staged, Store, StoreError, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Root of the bookkeeping subtree.
pub const BOOKKEEPING_DIR: &str = ".docsync";

/// Sync state record.
pub const STATE_PATH: &str = ".docsync/state.json";

/// Directory of queue records.
pub const QUEUE_DIR: &str = ".docsync/queue";

/// Directory of registry records.
pub const REGISTRY_DIR: &str = ".docsync/registry";

/// Encodes a record as pretty JSON with a trailing newline.
pub fn encode_record<T: Serialize>(record: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(record).map_err(CoreError::encode)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes a JSON record read from `path`.
pub fn decode_record<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> CoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::invalid_record(path, e))
}

/// Reads `path`, seeing the staged effects of `view` first.
///
/// Returns `None` when the file is missing or staged for deletion.
pub fn read_through(
    store: &dyn Store,
    view: Option<&Transaction>,
    path: &str,
) -> CoreResult<Option<Vec<u8>>> {
    match view.and_then(|tx| tx.lookup(path)) {
        Some(Staged::Written(bytes)) => return Ok(Some(bytes.to_vec())),
        Some(Staged::Deleted) => return Ok(None),
        None => {}
    }
    match store.read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
