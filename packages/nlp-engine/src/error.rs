/// Error types for the NLP embedding engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Empty or whitespace-only text. Rejected instead of producing a degenerate vector.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model not initialized - call initialize() first")]
    ModelNotInitialized,

    #[error("Model loading failed: {0}")]
    ModelLoadError(String),

    #[error("Tokenization failed: {0}")]
    TokenizationError(String),

    #[error("Inference failed: {0}")]
    InferenceError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Model file not found at path: {0}")]
    ModelNotFound(String),
}

impl EmbeddingError {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the caller supplied content that can never be embedded
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
