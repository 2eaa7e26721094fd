//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested path does not exist in the store.
    #[error("not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// The path is not a valid store-relative path.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A git command exited unsuccessfully.
    #[error("git {command} failed: {stderr}")]
    Git {
        /// The git subcommand that failed.
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A git command did not finish within its deadline.
    #[error("git {command} timed out")]
    Timeout {
        /// The git subcommand that timed out.
        command: String,
    },

    /// The operation was cancelled by the caller.
    #[error("store operation cancelled")]
    Cancelled,

    /// Another process holds the checkout lock.
    #[error("store locked: another process has exclusive access to {path}")]
    Locked {
        /// Root of the locked checkout.
        path: String,
    },

    /// A remote operation was requested but no remote is configured.
    #[error("no remote configured")]
    NoRemote,

    /// Injected or backend-specific failure.
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates a git failure error.
    pub fn git(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Git {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if retrying the operation may succeed.
    ///
    /// Git failures, timeouts and I/O errors are retried by callers that
    /// push with backoff; everything else is a caller or setup error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Git { .. }
                | StoreError::Timeout { .. }
                | StoreError::Io(_)
                | StoreError::Other(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::git("push", "connection reset").is_retryable());
        assert!(StoreError::Timeout {
            command: "push".into()
        }
        .is_retryable());
        assert!(!StoreError::Cancelled.is_retryable());
        assert!(!StoreError::NoRemote.is_retryable());
        assert!(!StoreError::not_found("a.md").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::InvalidPath {
            path: "../x".into(),
            reason: "parent components are not allowed",
        };
        assert!(err.to_string().contains("../x"));
        assert!(err.to_string().contains("parent"));
    }
}
