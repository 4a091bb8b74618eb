//! Embedding Record
//!
//! One record per embeddable document, replaced atomically whenever the
//! document's content hash changes.

use super::document::{ContentHash, DocumentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The latest embedding of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    pub doc_id: DocumentId,

    /// Fixed-length vector produced by the text encoder
    pub vector: Vec<f32>,

    /// Hash of the content this vector was computed from (staleness check)
    pub content_hash: ContentHash,

    /// Generation time; last-write-wins key for concurrent upserts
    pub generated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(doc_id: DocumentId, vector: Vec<f32>, content_hash: ContentHash) -> Self {
        Self {
            doc_id,
            vector,
            content_hash,
            generated_at: Utc::now(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Whether this record was computed from content with the given hash
    pub fn is_current_for(&self, hash: &ContentHash) -> bool {
        &self.content_hash == hash
    }
}
