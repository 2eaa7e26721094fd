//! # docsync Testkit
//!
//! Test utilities for docsync.
//!
//! This crate provides:
//! - A scripted in-memory remote workspace ([`MockRemote`])
//! - Fixtures for entities, blocks, users and stores
//! - Temporary git checkouts for end-to-end tests
//! - Property-based test generators using proptest
//! - Test-friendly tracing setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsync_testkit::prelude::*;
//!
//! #[test]
//! fn syncs_one_page() {
//!     let remote = MockRemote::new();
//!     remote.add_page(page("p1", "Home", 1), vec![paragraph("b1", "Hello")]);
//!     // ... build an engine over memory_store() and remote
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::*;
