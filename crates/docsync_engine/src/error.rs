//! Error types for the sync engine.

use crate::engine::EnginePhase;
use docsync_core::{CoreError, RemoteError};
use docsync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Registry, queue or converter error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote source error, after retries.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Pull has neither an explicit cutoff nor a stored one.
    #[error("no pull cutoff: pass one explicitly on the first run")]
    MissingCutoff,

    /// Push still failed after every retry.
    #[error("push failed after {attempts} attempts: {source}")]
    Push {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: StoreError,
    },

    /// Another operation is already running on the engine.
    #[error("engine busy: {phase:?} in progress")]
    Busy {
        /// The running operation.
        phase: EnginePhase,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl EngineError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns the remote error behind this error, if any.
    #[must_use]
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            EngineError::Remote(e) | EngineError::Core(CoreError::Remote(e)) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the failed item can never succeed and should be dropped.
    #[must_use]
    pub fn is_permanent_remote(&self) -> bool {
        self.as_remote().is_some_and(RemoteError::is_permanent)
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Remote(e) => e.is_retryable(),
            EngineError::Store(e) => e.is_retryable(),
            EngineError::Push { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
