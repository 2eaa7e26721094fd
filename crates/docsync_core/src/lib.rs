//! # docsync Core
//!
//! Data model and bookkeeping for docsync.
//!
//! This crate provides:
//! - Normalized entity ids and record types
//! - Page, file and user registries
//! - The persisted priority work queue
//! - The global sync state record
//! - The remote source contract ([`RemoteSource`])
//! - The Markdown converter and its front-matter parser
//!
//! Everything here reads through a [`docsync_store::Store`] and stages
//! mutations in a [`docsync_store::Transaction`] supplied by the caller.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod id;
mod layout;
mod markup;
mod queue;
mod registry;
mod remote;
mod state;
mod types;

pub use error::{CoreError, CoreResult};
pub use id::{normalize, optional as optional_id, EntityId};
pub use layout::{
    decode_record, encode_record, read_through, BOOKKEEPING_DIR, QUEUE_DIR, REGISTRY_DIR,
    STATE_PATH,
};
pub use markup::{parse_front_matter, render, FrontMatter, RenderOptions};
pub use queue::{Queue, QueueEntry, QueueItem, MAX_ITEMS_PER_RECORD, PRIORITY_THRESHOLD};
pub use registry::{content_hash, FileRegistry, PageRegistry, Registries, UserRegistry};
pub use remote::{
    Block, BlockKind, BlockPage, Entity, EntityPage, RemoteError, RemoteResult, RemoteSource,
    SearchControl, User, UserRef,
};
pub use state::SyncState;
pub use types::{EntityKind, QueueClass, QueueType, UserKind, SCHEMA_VERSION};
