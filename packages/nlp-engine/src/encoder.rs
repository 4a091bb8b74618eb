//! Text encoder abstraction and the built-in feature-hashing encoder
//!
//! Everything downstream of the NLP engine talks to a [`TextEncoder`]: a pure,
//! thread-safe function from text to a fixed-length vector. The hashing encoder
//! needs no model files and is what the service falls back to in stub mode.
use crate::error::{EmbeddingError, Result};
use sha2::{Digest, Sha256};

/// A local text encoder: text → fixed-length vector
///
/// Implementations must be deterministic for identical input and safe to call
/// from many threads at once. No network access.
pub trait TextEncoder: Send + Sync {
    /// Human-readable backend name (for logs and diagnostics)
    fn name(&self) -> &str;

    /// Output dimension, fixed for the lifetime of the encoder
    fn dimension(&self) -> usize;

    /// Embed content that will be stored and compared against
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed an ad-hoc search query
    ///
    /// Defaults to [`TextEncoder::embed`]; asymmetric models override it.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }
}

/// Reject empty or whitespace-only text
pub fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::invalid_input(
            "Cannot generate embedding for empty text",
        ));
    }
    Ok(())
}

/// L2 normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(values: &mut [f32]) {
    let magnitude = values
        .iter()
        .fold(0.0f32, |acc, &val| val.mul_add(val, acc))
        .sqrt();

    if magnitude > 0.0 {
        for value in values.iter_mut() {
            *value /= magnitude;
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "i", "in", "is", "it",
    "its", "me", "my", "of", "on", "or", "our", "that", "the", "this", "to", "was", "we",
    "were", "with", "you", "your",
];

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;
const TRIGRAM_WEIGHT: f32 = 0.3;

/// Deterministic feature-hashing encoder
///
/// Lower-cases and tokenizes the text, drops stop words, applies light suffix
/// stemming and hashes word unigrams, adjacent-word bigrams and character
/// trigrams into `dimension` signed buckets. Bucket indices come from SHA-256
/// so vectors are identical across processes, platforms and releases.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn features(text: &str) -> Vec<(String, f32)> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut content: Vec<String> = words
            .iter()
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
            .map(|w| stem(w))
            .collect();

        // A sentence made only of stop words still deserves a vector
        if content.is_empty() {
            content = words.iter().map(|w| stem(w)).collect();
        }

        let mut features = Vec::new();

        if content.is_empty() {
            // Punctuation or symbols only: fall back to raw character trigrams
            let padded: Vec<char> = format!("^{}$", text.trim()).chars().collect();
            for window in padded.windows(3) {
                features.push((
                    format!("c:{}", window.iter().collect::<String>()),
                    TRIGRAM_WEIGHT,
                ));
            }
            return features;
        }

        for token in &content {
            features.push((format!("w:{token}"), UNIGRAM_WEIGHT));

            let padded: Vec<char> = format!("^{token}$").chars().collect();
            for window in padded.windows(3) {
                features.push((
                    format!("t:{}", window.iter().collect::<String>()),
                    TRIGRAM_WEIGHT,
                ));
            }
        }

        for pair in content.windows(2) {
            features.push((format!("b:{} {}", pair[0], pair[1]), BIGRAM_WEIGHT));
        }

        features
    }

    /// Map a feature to (bucket, sign)
    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl TextEncoder for HashingEncoder {
    fn name(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        validate_text(text)?;

        let mut vector = vec![0.0f32; self.dimension];
        for (feature, weight) in Self::features(text) {
            let (index, sign) = self.bucket(&feature);
            vector[index] += sign * weight;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Light suffix stemming so "trails"/"trail" and "hiking"/"hike" share features
fn stem(word: &str) -> String {
    let len = word.chars().count();
    if len > 5 && word.ends_with("ing") {
        return word[..word.len() - 3].to_string();
    }
    if len > 4 && word.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if len > 4 && word.ends_with("ed") {
        return word[..word.len() - 2].to_string();
    }
    if len > 4 && word.ends_with("ly") {
        return word[..word.len() - 2].to_string();
    }
    if len > 3 && word.ends_with('s') && !word.ends_with("ss") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        let encoder = HashingEncoder::new(384);
        assert!(encoder.embed("").unwrap_err().is_invalid_input());
        assert!(encoder.embed("   \n\t").unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_deterministic_and_normalized() {
        let encoder = HashingEncoder::new(384);
        let a = encoder.embed("I love hiking in the mountains").unwrap();
        let b = encoder.embed("I love hiking in the mountains").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);

        let magnitude: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let encoder = HashingEncoder::new(384);
        let hiking = encoder.embed("I love hiking in the mountains").unwrap();
        let query = encoder.embed("hiking trip planning").unwrap();
        let taxes = encoder.embed("Quarterly tax filing deadlines").unwrap();

        assert!(cosine(&hiking, &query) > cosine(&taxes, &query));
    }

    #[test]
    fn test_stop_words_only_still_embeds() {
        let encoder = HashingEncoder::new(64);
        let vector = encoder.embed("the and of").unwrap();
        assert!(vector.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_symbols_only_still_embeds() {
        let encoder = HashingEncoder::new(64);
        let vector = encoder.embed("?!").unwrap();
        assert!(vector.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("trails"), "trail");
        assert_eq!(stem("mountains"), "mountain");
        assert_eq!(stem("hiking"), "hik");
        assert_eq!(stem("activities"), "activity");
        assert_eq!(stem("glass"), "glass");
        assert_eq!(stem("is"), "is");
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut values = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut values);
        assert!(values.iter().all(|&x| x == 0.0));
    }
}
