//! Error types for docsync core.

use crate::remote::RemoteError;
use docsync_store::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in docsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote source error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A persisted record could not be decoded.
    #[error("invalid record {path}: {message}")]
    InvalidRecord {
        /// Store path of the record.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// A record could not be encoded.
    #[error("encoding failed: {message}")]
    Encode {
        /// Encoder message.
        message: String,
    },

    /// A markup file has no parseable front-matter header.
    #[error("missing front-matter: {message}")]
    MissingFrontMatter {
        /// Why parsing failed.
        message: String,
    },

    /// The queue ran out of record numbers in a class.
    #[error("queue numbering exhausted for {class} records")]
    QueueExhausted {
        /// `priority` or `batch`.
        class: &'static str,
    },

    /// Operation not permitted with the given arguments.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid record error.
    pub fn invalid_record(path: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidRecord {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Creates an encoding error.
    pub fn encode(message: impl ToString) -> Self {
        Self::Encode {
            message: message.to_string(),
        }
    }

    /// Creates a missing front-matter error.
    pub fn missing_front_matter(message: impl Into<String>) -> Self {
        Self::MissingFrontMatter {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error is a store not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Store(StoreError::NotFound { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::invalid_record(".docsync/state.json", "expected value");
        assert_eq!(
            err.to_string(),
            "invalid record .docsync/state.json: expected value"
        );

        let err = CoreError::QueueExhausted { class: "priority" };
        assert!(err.to_string().contains("priority"));
    }

    #[test]
    fn not_found_detection() {
        let err: CoreError = StoreError::not_found("x").into();
        assert!(err.is_not_found());
        assert!(!CoreError::invalid_operation("x").is_not_found());
    }
}
