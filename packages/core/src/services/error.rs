//! Pipeline Error Types
//!
//! Only storage failures are fatal to an operation. Stale writes, degenerate
//! projections and budget overruns are reported through outcomes, logs and
//! metrics instead of `Err`.

use crate::db::StoreError;
use notesphere_nlp_engine::EmbeddingError;
use thiserror::Error;

/// Pipeline operation errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Empty or unembeddable content; affects only the offending document
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The text encoder failed for a reason other than bad input
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Persistence failed; the caller must retry the change
    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The coordinator's writer task is gone
    #[error("Coordinator is shut down")]
    CoordinatorClosed,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn embedding_failed(msg: impl Into<String>) -> Self {
        Self::EmbeddingFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::EmbeddingFailed(_))
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err)
    }
}

impl From<EmbeddingError> for PipelineError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::InvalidInput(msg) => Self::InvalidInput(msg),
            EmbeddingError::ConfigError(msg) => Self::Config(msg),
            other => Self::EmbeddingFailed(other.to_string()),
        }
    }
}
