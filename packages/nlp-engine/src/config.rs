/// Configuration for the embedding service
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum supported sequence length for transformer models
/// Limited by attention matrix memory requirements (O(n²))
const MAX_SUPPORTED_SEQUENCE_LENGTH: usize = 8192;

/// Configuration for the sentence embedding model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name or identifier
    pub model_name: String,

    /// Local model directory (config.json, tokenizer.json, model.safetensors)
    pub model_path: Option<PathBuf>,

    /// Maximum sequence length for tokenization
    pub max_sequence_length: usize,

    /// Output vector dimension
    pub dimension: usize,

    /// Optional prefix prepended to stored documents before encoding
    pub document_prefix: Option<String>,

    /// Optional prefix prepended to search queries before encoding
    pub query_prefix: Option<String>,

    /// Maximum cache size (number of embeddings to cache)
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            model_path: None,
            max_sequence_length: 256,
            dimension: crate::EMBEDDING_DIMENSION,
            document_prefix: None,
            query_prefix: None,
            cache_capacity: 10000,
        }
    }
}

impl EmbeddingConfig {
    /// Get the model directory, resolving it from ~/.notesphere/models/
    ///
    /// - macOS/Linux: ~/.notesphere/models/sentence-transformers-all-MiniLM-L6-v2/
    /// - Windows: %USERPROFILE%\.notesphere\models\sentence-transformers-all-MiniLM-L6-v2\
    pub fn resolve_model_path(&self) -> Result<PathBuf, std::io::Error> {
        if let Some(path) = &self.model_path {
            if path.exists() {
                return Ok(path.clone());
            }
        }

        let home_dir = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Cannot determine home directory",
            )
        })?;

        let model_path = home_dir
            .join(".notesphere")
            .join("models")
            .join(sanitize_model_name(&self.model_name));

        if model_path.exists() {
            Ok(model_path)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "Model not found at {:?}. Please install model to ~/.notesphere/models/",
                    model_path
                ),
            ))
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.model_name.is_empty() {
            return Err("model_name cannot be empty".to_string());
        }

        if self.max_sequence_length == 0 {
            return Err("max_sequence_length must be greater than 0".to_string());
        }

        if self.max_sequence_length > MAX_SUPPORTED_SEQUENCE_LENGTH {
            return Err(format!(
                "max_sequence_length cannot exceed {} (transformer attention matrix memory limit)",
                MAX_SUPPORTED_SEQUENCE_LENGTH
            ));
        }

        if self.dimension == 0 {
            return Err("dimension must be greater than 0".to_string());
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Sanitize model name to be filesystem-safe
/// Replaces all filesystem-unsafe characters with hyphens
fn sanitize_model_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' | '"' => '-',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.model_name, "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(config.max_sequence_length, 256);
        assert_eq!(config.dimension, 384);
        assert!(config.query_prefix.is_none());
        assert_eq!(config.cache_capacity, 10000);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EmbeddingConfig::default();

        assert!(config.validate().is_ok());

        config.model_name = String::new();
        assert!(config.validate().is_err());

        config.model_name = "test".to_string();
        config.max_sequence_length = 0;
        assert!(config.validate().is_err());

        config.max_sequence_length = 10000;
        assert!(config.validate().is_err());

        config.max_sequence_length = 256;
        config.dimension = 0;
        assert!(config.validate().is_err());

        config.dimension = 384;
        config.cache_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sanitize_model_name() {
        assert_eq!(
            sanitize_model_name("sentence-transformers/all-MiniLM-L6-v2"),
            "sentence-transformers-all-MiniLM-L6-v2"
        );
        assert_eq!(sanitize_model_name("a:b*c"), "a-b-c");
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: EmbeddingConfig =
            serde_json::from_str(r#"{"cache_capacity": 16}"#).unwrap();
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.dimension, 384);
    }
}
