/// Core embedding service
///
/// Wraps a local [`TextEncoder`] backend with input validation, an LRU cache,
/// L2 normalisation and document/query prefixes.
/// - With the `embedding-service` feature and a model on disk: sentence-transformer via candle
/// - Otherwise: deterministic feature-hashing encoder ("stub mode")
use crate::config::EmbeddingConfig;
use crate::encoder::{l2_normalize, validate_text, HashingEncoder, TextEncoder};
use crate::error::{EmbeddingError, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Embedding vector dimension for all-MiniLM-L6-v2
pub const EMBEDDING_DIMENSION: usize = 384;

/// Main embedding service
pub struct EmbeddingService {
    config: EmbeddingConfig,
    backend: Option<Box<dyn TextEncoder>>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    initialized: bool,
}

impl EmbeddingService {
    /// Create a new embedding service with the given configuration
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        config.validate().map_err(EmbeddingError::ConfigError)?;

        let cache_capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| EmbeddingError::ConfigError("cache_capacity must be > 0".to_string()))?;

        Ok(Self {
            config,
            backend: None,
            cache: Mutex::new(LruCache::new(cache_capacity)),
            initialized: false,
        })
    }

    /// Create an initialized service around an explicit backend
    pub fn with_encoder(config: EmbeddingConfig, encoder: Box<dyn TextEncoder>) -> Result<Self> {
        let mut service = Self::new(config)?;
        service.config.dimension = encoder.dimension();
        service.backend = Some(encoder);
        service.initialized = true;
        Ok(service)
    }

    /// Initialize the model (loads from the local model directory)
    ///
    /// If the model is not found, or the `embedding-service` feature is disabled,
    /// the service operates in stub mode using the feature-hashing encoder.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        #[cfg(feature = "embedding-service")]
        {
            tracing::info!("Loading embedding model: {}", self.config.model_name);

            match self.config.resolve_model_path() {
                Ok(model_path) => {
                    tracing::info!("Model path resolved to: {:?}", model_path);
                    let encoder = crate::model::ModelEncoder::load(
                        &model_path,
                        &self.config.model_name,
                        self.config.max_sequence_length,
                    )?;
                    self.config.dimension = encoder.dimension();
                    self.backend = Some(Box::new(encoder));
                }
                Err(e) => {
                    tracing::warn!(
                        "Model not found, operating in stub mode (feature hashing): {}",
                        e
                    );
                    self.backend = Some(Box::new(HashingEncoder::new(self.config.dimension)));
                }
            }
        }

        #[cfg(not(feature = "embedding-service"))]
        {
            tracing::info!("STUB: Embedding service using feature hashing (feature disabled)");
            self.backend = Some(Box::new(HashingEncoder::new(self.config.dimension)));
        }

        self.initialized = true;
        Ok(())
    }

    /// Generate embedding for a document (uses the document prefix, if any)
    ///
    /// Use this for content that will be stored and searched against.
    pub fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        validate_text(text)?;
        let prefixed = match &self.config.document_prefix {
            Some(prefix) => format!("{}{}", prefix, text),
            None => text.to_string(),
        };
        self.generate_embedding_internal(&prefixed, false)
    }

    /// Generate embedding for a search query (uses the query prefix, if any)
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        validate_text(text)?;
        let prefixed = match &self.config.query_prefix {
            Some(prefix) => format!("{}{}", prefix, text),
            None => text.to_string(),
        };
        self.generate_embedding_internal(&prefixed, true)
    }

    /// Generate embedding for a single text (defaults to document embedding)
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_document(text)
    }

    /// Warm up the backend by generating a throwaway embedding
    pub fn warmup(&self) -> Result<()> {
        tracing::info!("Warming up embedding model...");
        let start = std::time::Instant::now();
        let _ = self.generate_embedding("warmup")?;
        tracing::info!("Embedding model warmed up in {:?}", start.elapsed());
        Ok(())
    }

    /// Internal embedding generation with caching
    fn generate_embedding_internal(&self, prefixed_text: &str, is_query: bool) -> Result<Vec<f32>> {
        // Query and document vectors may differ for asymmetric models
        let cache_key = format!("{}{}", if is_query { "q:" } else { "d:" }, prefixed_text);

        {
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(cached) = cache.get(&cache_key) {
                return Ok(cached.clone());
            }
        }

        let backend = self
            .backend
            .as_ref()
            .ok_or(EmbeddingError::ModelNotInitialized)?;

        let start = std::time::Instant::now();
        let mut embedding = if is_query {
            backend.embed_query(prefixed_text)?
        } else {
            backend.embed(prefixed_text)?
        };
        l2_normalize(&mut embedding);

        if embedding.len() != self.config.dimension {
            return Err(EmbeddingError::InferenceError(format!(
                "Backend returned {} dimensions, expected {}",
                embedding.len(),
                self.config.dimension
            )));
        }

        tracing::debug!(
            "EMBEDDING PROFILE: backend={} total={:?} chars={}",
            backend.name(),
            start.elapsed(),
            prefixed_text.len()
        );

        {
            let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            cache.put(cache_key, embedding.clone());
        }

        Ok(embedding)
    }

    /// Generate embeddings for multiple texts (batch operation)
    pub fn generate_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        texts
            .into_iter()
            .map(|text| self.generate_embedding(text))
            .collect()
    }

    /// Convert embedding vector to little-endian f32 blob format for storage
    #[must_use]
    pub fn to_blob(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Convert blob format back to embedding vector
    #[must_use]
    pub fn from_blob(blob: &[u8]) -> Vec<f32> {
        blob.chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect()
    }

    /// Clear the embedding cache
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.clear();
    }

    /// Get cache statistics (size, capacity)
    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        (cache.len(), cache.cap().get())
    }

    /// Check if service is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get the embedding dimension
    pub fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    /// Get backend information
    pub fn device_info(&self) -> String {
        match &self.backend {
            Some(backend) => format!("{} (cpu, dimension {})", backend.name(), backend.dimension()),
            None => "not initialized".to_string(),
        }
    }
}

impl TextEncoder for EmbeddingService {
    fn name(&self) -> &str {
        self.backend
            .as_ref()
            .map(|backend| backend.name())
            .unwrap_or("uninitialized")
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_document(text)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        EmbeddingService::embed_query(self, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_service() -> EmbeddingService {
        let mut service = EmbeddingService::new(EmbeddingConfig::default()).unwrap();
        service.initialize().unwrap();
        service
    }

    #[test]
    fn test_blob_conversion() {
        let embedding = vec![0.1, 0.2, 0.3, -0.4, 1.5];
        let blob = EmbeddingService::to_blob(&embedding);
        let recovered = EmbeddingService::from_blob(&blob);

        assert_eq!(embedding.len(), recovered.len());
        for (original, recovered) in embedding.iter().zip(recovered.iter()) {
            assert!((original - recovered).abs() < 1e-6);
        }
    }

    #[test]
    fn test_service_creation() {
        let service = EmbeddingService::new(EmbeddingConfig::default()).unwrap();
        assert!(!service.is_initialized());
        assert!(matches!(
            service.embed_document("hello"),
            Err(EmbeddingError::ModelNotInitialized)
        ));
    }

    #[test]
    fn test_cache_stats() {
        let service = stub_service();
        let (len, capacity) = service.cache_stats();
        assert_eq!(len, 0);
        assert!(capacity > 0);

        service.embed_document("cached text").unwrap();
        service.embed_document("cached text").unwrap();
        assert_eq!(service.cache_stats().0, 1);

        service.clear_cache();
        assert_eq!(service.cache_stats().0, 0);
    }

    #[test]
    fn test_empty_input_rejected_before_backend() {
        let service = EmbeddingService::new(EmbeddingConfig::default()).unwrap();
        // Validation happens before the initialization check
        assert!(service.embed_document("  ").unwrap_err().is_invalid_input());
        assert!(service.embed_query("").unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_stub_embedding_dimension_and_norm() {
        let service = stub_service();
        let embedding = service.generate_embedding("test sentence").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIMENSION);

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_query_prefix_changes_vector() {
        let config = EmbeddingConfig {
            query_prefix: Some("search query ".to_string()),
            ..EmbeddingConfig::default()
        };
        let mut service = EmbeddingService::new(config).unwrap();
        service.initialize().unwrap();

        let document = service.embed_document("mountain trails").unwrap();
        let query = service.embed_query("mountain trails").unwrap();
        assert_ne!(document, query);
    }

    #[test]
    fn test_with_encoder_adopts_dimension() {
        let service = EmbeddingService::with_encoder(
            EmbeddingConfig::default(),
            Box::new(HashingEncoder::new(32)),
        )
        .unwrap();
        assert!(service.is_initialized());
        assert_eq!(service.embedding_dimension(), 32);
        assert_eq!(service.embed("abc").unwrap().len(), 32);
    }

    #[test]
    fn test_embedding_dimension() {
        assert_eq!(EMBEDDING_DIMENSION, 384);
    }
}
