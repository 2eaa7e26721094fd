//! # docsync Engine
//!
//! Mirrors a hosted document workspace into a version-controlled
//! directory of Markdown files.
//!
//! This crate provides:
//! - Discovery of remote changes into the work queue ([`SyncEngine::pull`])
//! - Materialization of queued entities ([`SyncEngine::sync`])
//! - Orphan removal ([`SyncEngine::cleanup`])
//! - Registry reconstruction from files ([`SyncEngine::reindex`])
//! - Checkpoint commits and pushes with backoff
//! - A debounced background worker ([`SyncWorker`])
//! - A rate-limited, retrying remote wrapper ([`ThrottledSource`])
//!
//! ## Key Invariants
//!
//! - Every unit of work is applied atomically, queue record included
//! - A child is never written before its parent exists locally
//! - File paths of synced entities never change after first assignment
//! - Re-running a sync with no remote changes creates no commits

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cleanup;
mod client;
mod config;
mod engine;
mod error;
mod pull;
mod reindex;
mod sync;
mod tree;
mod worker;

pub use cleanup::CleanupReport;
pub use client::ThrottledSource;
pub use config::{EngineConfig, RateLimitConfig, RetryConfig, RootConfig, SyncLimits, WorkerConfig};
pub use engine::{EnginePhase, EngineStats, PassReport, SyncEngine};
pub use error::{EngineError, EngineResult};
pub use pull::{PullOptions, PullReport};
pub use reindex::ReindexReport;
pub use sync::{StopReason, SyncOptions, SyncProgress, SyncReport};
pub use tree::{child_entities, fetch_rows, fetch_tree};
pub use worker::{Notifier, SyncWorker};
