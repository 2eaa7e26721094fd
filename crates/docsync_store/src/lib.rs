//! # docsync Store
//!
//! Transactional, version-controlled file store for docsync.
//!
//! This crate provides the lowest layer of the mirror: a working tree of
//! files whose mutations are staged in a [`Transaction`] and applied (or
//! committed) in one step. Stores know nothing about pages, queues or
//! registries; they move bytes and record history.
//!
//! ## Design Principles
//!
//! - Reads go straight to the working tree under a shared lock
//! - Mutations are staged in memory and applied under an exclusive lock
//! - A commit is created only when the working tree actually changed
//! - Network operations take a cancellation token and a deadline
//!
//! ## Available Stores
//!
//! - [`GitStore`] - working tree backed by a git repository
//! - [`MemoryStore`] - for testing
//! - [`SplitStore`] - keeps bookkeeping records in a separate store
//!
//! ## Example
//!
//! ```rust
//! use docsync_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let mut tx = store.begin_tx();
//! tx.write("guides/intro.md", b"# Intro\n".to_vec()).unwrap();
//! let outcome = store.commit(tx, "add intro").unwrap();
//! assert!(outcome.is_committed());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod config;
mod error;
mod git;
mod memory;
mod split;
mod store;
mod transaction;
mod worktree;

pub use command::git_available;
pub use config::{GitConfig, RemoteConfig};
pub use error::{StoreError, StoreResult};
pub use git::GitStore;
pub use memory::{CommitRecord, MemoryStore};
pub use split::{SplitStore, BOOKKEEPING_PREFIX};
pub use store::{CommitOutcome, RemoteOutcome, Store};
pub use transaction::{normalize_path, Staged, StagedOp, Transaction};
