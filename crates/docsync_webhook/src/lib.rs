//! # docsync Webhook
//!
//! Inbound change events for docsync.
//!
//! This crate provides:
//! - HMAC-SHA256 signature verification with a replay window
//! - Event parsing and classification
//! - Priority queueing of changed entities and worker wake-up
//!
//! HTTP plumbing is left to the embedding service: it hands each request
//! to [`WebhookHandler::accept`], answers with the error's
//! [`status`](WebhookError::status) on rejection and 200 otherwise.
//!
//! # Signing
//!
//! ```rust
//! use docsync_webhook::{SignatureVerifier, WebhookConfig};
//!
//! let verifier = SignatureVerifier::new(&WebhookConfig::new().with_secret("s3cret"));
//! let body = br#"{"type":"page.created","entity":{"id":"p1"}}"#;
//! let now = chrono::Utc::now().timestamp().to_string();
//! let signature = verifier.sign(&now, body).unwrap();
//! assert!(verifier.verify(Some(&now), Some(&signature), body).is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;

pub use auth::SignatureVerifier;
pub use config::WebhookConfig;
pub use error::{WebhookError, WebhookResult};
pub use handler::{
    EventAction, EventEntity, EventOutcome, WebhookEvent, WebhookHandler, WebhookRequest,
};
