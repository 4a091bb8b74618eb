/// NoteSphere NLP Engine - Local Sentence Embedding Service
///
/// This crate turns note content into fixed-length semantic vectors that the
/// positioning pipeline compares with cosine similarity.
///
/// # Features
///
/// - **Local Only**: Models are loaded from disk, no network access
/// - **Stub Mode**: Deterministic feature-hashing encoder when no model is installed
/// - **Efficient Caching**: LRU cache keyed by prefixed text
/// - **Asymmetric Embeddings**: Separate prefixes for documents vs queries
/// - **Pluggable Backends**: Anything implementing [`TextEncoder`]
///
/// # Example
///
/// ```
/// use notesphere_nlp_engine::{EmbeddingConfig, EmbeddingService};
///
/// let mut service = EmbeddingService::new(EmbeddingConfig::default()).unwrap();
/// service.initialize().unwrap();
///
/// let vector = service.embed_document("I love hiking in the mountains").unwrap();
/// assert_eq!(vector.len(), notesphere_nlp_engine::EMBEDDING_DIMENSION);
/// ```
pub mod config;
pub mod embedding;
pub mod encoder;
pub mod error;
#[cfg(feature = "embedding-service")]
pub mod model;

// Re-export main types
pub use config::EmbeddingConfig;
pub use embedding::{EmbeddingService, EMBEDDING_DIMENSION};
pub use encoder::{l2_normalize, validate_text, HashingEncoder, TextEncoder};
pub use error::{EmbeddingError, Result};
#[cfg(feature = "embedding-service")]
pub use model::ModelEncoder;
