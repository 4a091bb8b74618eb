//! In-memory VectorStore
//!
//! Whole-record replacement under a `tokio::sync::RwLock`. Used by tests and
//! by callers that do not need durability. The failure switch lets tests
//! exercise the `StoreUnavailable` path.

use super::error::StoreError;
use super::vector_store::{resolve_upsert, UpsertOutcome, VectorStore};
use crate::models::{DocumentId, EmbeddingRecord, LayoutPoint};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    embeddings: BTreeMap<DocumentId, EmbeddingRecord>,
    layout: BTreeMap<DocumentId, LayoutPoint>,
}

#[derive(Default)]
pub struct MemoryVectorStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(format!(
                "memory store offline during {}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, record: EmbeddingRecord) -> Result<UpsertOutcome, StoreError> {
        self.check("upsert")?;
        let mut tables = self.tables.write().await;
        let outcome = resolve_upsert(tables.embeddings.get(&record.doc_id), &record);
        if outcome != UpsertOutcome::Stale {
            tables.embeddings.insert(record.doc_id.clone(), record);
        }
        Ok(outcome)
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<EmbeddingRecord>, StoreError> {
        self.check("get")?;
        Ok(self.tables.read().await.embeddings.get(id).cloned())
    }

    async fn remove(&self, id: &DocumentId) -> Result<bool, StoreError> {
        self.check("remove")?;
        let mut tables = self.tables.write().await;
        tables.layout.remove(id);
        Ok(tables.embeddings.remove(id).is_some())
    }

    async fn all_embeddings(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        self.check("all_embeddings")?;
        Ok(self.tables.read().await.embeddings.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.check("count")?;
        Ok(self.tables.read().await.embeddings.len())
    }

    async fn save_layout(&self, points: &[LayoutPoint]) -> Result<(), StoreError> {
        self.check("save_layout")?;
        let mut tables = self.tables.write().await;
        for point in points {
            tables.layout.insert(point.doc_id.clone(), point.clone());
        }
        Ok(())
    }

    async fn load_layout(&self) -> Result<Vec<LayoutPoint>, StoreError> {
        self.check("load_layout")?;
        Ok(self.tables.read().await.layout.values().cloned().collect())
    }

    async fn clear_layout(&self) -> Result<(), StoreError> {
        self.check("clear_layout")?;
        self.tables.write().await.layout.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentHash;
    use chrono::Duration;

    fn record(id: &str, value: f32) -> EmbeddingRecord {
        EmbeddingRecord::new(DocumentId::from(id), vec![value, 0.0], ContentHash::of(id))
    }

    #[tokio::test]
    async fn test_upsert_outcomes_last_write_wins() {
        let store = MemoryVectorStore::new();
        let first = record("a", 1.0);

        let mut newer = record("a", 2.0);
        newer.generated_at = first.generated_at + Duration::seconds(1);

        let mut older = record("a", 3.0);
        older.generated_at = first.generated_at - Duration::seconds(1);

        assert_eq!(store.upsert(first).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(newer).await.unwrap(), UpsertOutcome::Replaced);
        assert_eq!(store.upsert(older).await.unwrap(), UpsertOutcome::Stale);

        let stored = store.get(&"a".into()).await.unwrap().unwrap();
        assert_eq!(stored.vector, vec![2.0, 0.0]);
    }

    #[tokio::test]
    async fn test_remove_drops_layout_point() {
        let store = MemoryVectorStore::new();
        store.upsert(record("a", 1.0)).await.unwrap();
        store
            .save_layout(&[LayoutPoint {
                doc_id: "a".into(),
                x: 1.0,
                y: 2.0,
                version: 1,
            }])
            .await
            .unwrap();

        assert!(store.remove(&"a".into()).await.unwrap());
        assert!(!store.remove(&"a".into()).await.unwrap());
        assert!(store.load_layout().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_embeddings_sorted_by_id() {
        let store = MemoryVectorStore::new();
        for id in ["c", "a", "b"] {
            store.upsert(record(id, 1.0)).await.unwrap();
        }
        let ids: Vec<String> = store
            .all_embeddings()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.doc_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryVectorStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.upsert(record("a", 1.0)).await,
            Err(StoreError::Unavailable { .. })
        ));
        store.set_unavailable(false);
        assert!(store.upsert(record("a", 1.0)).await.is_ok());
    }
}
