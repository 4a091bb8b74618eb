//! Vector Store Error Types
//!
//! Every persistence failure is `Unavailable` from the pipeline's point of
//! view: the triggering change fails and the caller retries.

use thiserror::Error;

/// Vector store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying persistence failed (connection, I/O, SQL)
    #[error("Vector store unavailable: {context}")]
    Unavailable { context: String },

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A vector's length disagrees with what the store recorded for it
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl StoreError {
    /// Create an unavailable error with context
    pub fn unavailable(context: impl Into<String>) -> Self {
        Self::Unavailable {
            context: context.into(),
        }
    }

    /// Create a corrupt record error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }
}

impl From<libsql::Error> for StoreError {
    fn from(err: libsql::Error) -> Self {
        Self::unavailable(format!("libsql: {}", err))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::unavailable(format!("io: {}", err))
    }
}
