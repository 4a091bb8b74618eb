//! Document Identity and Content
//!
//! Documents are owned by the storage collaborator; the pipeline only reads
//! their id, content and content hash.
//!
//! # Examples
//!
//! ```rust
//! use notesphere_core::models::{ContentHash, Document};
//!
//! let doc = Document::new("I love hiking in the mountains".to_string());
//! assert_eq!(doc.content_hash, ContentHash::of("I love hiking in the mountains"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Stable, immutable document identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hex SHA-256 digest of document content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Digest `content` exactly as given (no trimming or normalisation)
    pub fn of(content: &str) -> Self {
        Self(hex::encode(Sha256::digest(content.as_bytes())))
    }

    /// Wrap an already-computed digest (e.g. one read back from storage)
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A free-form text document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub content: String,
    pub content_hash: ContentHash,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Document {
    /// Create a document with a generated id
    pub fn new(content: String) -> Self {
        Self::new_with_id(DocumentId::generate(), content)
    }

    pub fn new_with_id(id: DocumentId, content: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            content_hash: ContentHash::of(&content),
            content,
            created_at: now,
            modified_at: now,
        }
    }

    /// Replace the content, refreshing hash and modification time
    ///
    /// Returns `false` (and leaves the document untouched) when the content
    /// is byte-for-byte identical.
    pub fn update_content(&mut self, content: String) -> bool {
        let hash = ContentHash::of(&content);
        if hash == self.content_hash {
            return false;
        }
        self.content = content;
        self.content_hash = hash;
        self.modified_at = Utc::now();
        true
    }

    /// Whether the document has anything worth embedding
    pub fn is_embeddable(&self) -> bool {
        !self.content.trim().is_empty()
    }
}
