//! VectorStore Trait - Embedding Persistence Abstraction
//!
//! Durable mapping from document id to its latest [`EmbeddingRecord`], plus
//! the persisted layout points that must survive restarts alongside it.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All methods are async so embedded (libsql) and in-memory
//!    backends share one interface
//! 2. **Whole-record replacement**: an upsert swaps the complete record; readers
//!    never observe a partially written vector
//! 3. **Last-write-wins**: concurrent upserts for one id resolve by
//!    `generated_at`; an older incoming record is reported as [`UpsertOutcome::Stale`]
//!
//! # Examples
//!
//! ```rust
//! use notesphere_core::db::{MemoryVectorStore, UpsertOutcome, VectorStore};
//! use notesphere_core::models::{ContentHash, DocumentId, EmbeddingRecord};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
//! let record = EmbeddingRecord::new(
//!     DocumentId::from("a"),
//!     vec![1.0, 0.0],
//!     ContentHash::of("hello"),
//! );
//! assert_eq!(store.upsert(record).await.unwrap(), UpsertOutcome::Inserted);
//! assert!(store.get(&DocumentId::from("a")).await.unwrap().is_some());
//! # });
//! ```

use super::error::StoreError;
use crate::models::{DocumentId, EmbeddingRecord, LayoutPoint};
use async_trait::async_trait;

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for the id
    Inserted,
    /// An older (or equally old) record was replaced
    Replaced,
    /// The stored record is newer; the incoming one was discarded
    Stale,
}

/// Decide an upsert against the currently stored record
pub(crate) fn resolve_upsert(
    existing: Option<&EmbeddingRecord>,
    incoming: &EmbeddingRecord,
) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Inserted,
        Some(current) if incoming.generated_at < current.generated_at => UpsertOutcome::Stale,
        Some(_) => UpsertOutcome::Replaced,
    }
}

/// Abstraction layer for embedding and layout persistence
///
/// Implementations must be `Send + Sync`; the coordinator shares one store
/// between its writer task and read-only query paths.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Atomically insert or replace the record for `record.doc_id`
    async fn upsert(&self, record: EmbeddingRecord) -> Result<UpsertOutcome, StoreError>;

    /// Fetch the current record for a document
    async fn get(&self, id: &DocumentId) -> Result<Option<EmbeddingRecord>, StoreError>;

    /// Remove a document's embedding and its persisted layout point
    ///
    /// Returns whether an embedding existed.
    async fn remove(&self, id: &DocumentId) -> Result<bool, StoreError>;

    /// All records, ordered by document id
    async fn all_embeddings(&self) -> Result<Vec<EmbeddingRecord>, StoreError>;

    /// Number of stored embeddings
    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.all_embeddings().await?.len())
    }

    /// Insert or overwrite persisted layout points
    async fn save_layout(&self, points: &[LayoutPoint]) -> Result<(), StoreError>;

    /// All persisted layout points, ordered by document id
    async fn load_layout(&self) -> Result<Vec<LayoutPoint>, StoreError>;

    /// Drop every persisted layout point
    async fn clear_layout(&self) -> Result<(), StoreError>;
}
