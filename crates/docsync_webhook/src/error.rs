//! Error types for inbound event handling.

use docsync_core::CoreError;
use docsync_store::StoreError;
use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Errors that can occur while accepting an event.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// A secret is configured but the request carries no signature.
    #[error("missing signature")]
    MissingSignature,

    /// A secret is configured but the request carries no timestamp.
    #[error("missing timestamp")]
    MissingTimestamp,

    /// The timestamp is not a number of seconds.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The timestamp is outside the accepted window.
    #[error("stale timestamp: {skew_secs}s away from now")]
    StaleTimestamp {
        /// Distance from the current time, in seconds.
        skew_secs: i64,
    },

    /// The signature does not match the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// The body is not a valid event.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Registry or queue error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Returns true if the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, WebhookError::Core(_) | WebhookError::Store(_))
    }

    /// HTTP status an HTTP front end should answer with.
    pub fn status(&self) -> u16 {
        match self {
            WebhookError::MissingSignature
            | WebhookError::MissingTimestamp
            | WebhookError::StaleTimestamp { .. }
            | WebhookError::InvalidSignature => 401,
            WebhookError::InvalidTimestamp(_) | WebhookError::Payload(_) => 400,
            WebhookError::Core(_) | WebhookError::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(WebhookError::InvalidSignature.is_client_error());
        assert_eq!(WebhookError::InvalidSignature.status(), 401);
        assert_eq!(WebhookError::InvalidTimestamp("x".into()).status(), 400);

        let store = WebhookError::from(StoreError::not_found("a.md"));
        assert!(!store.is_client_error());
        assert_eq!(store.status(), 500);
    }

    #[test]
    fn error_display() {
        let err = WebhookError::StaleTimestamp { skew_secs: -400 };
        assert!(err.to_string().contains("-400"));
    }
}
