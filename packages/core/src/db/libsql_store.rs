//! libsql-backed VectorStore
//!
//! Durable embeddings and layout points in an embedded SQLite-compatible
//! database file.
//!
//! # Schema
//!
//! - `embeddings`: one row per document, vector stored as a little-endian f32 blob
//! - `layout_points`: one row per placed document
//!
//! # Connection Pattern
//!
//! Every operation opens its own connection with a 5 second busy timeout, so
//! futures can move between Tokio worker threads without sharing a handle.

use super::error::StoreError;
use super::vector_store::{UpsertOutcome, VectorStore};
use crate::models::{ContentHash, DocumentId, EmbeddingRecord, LayoutPoint};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database};
use notesphere_nlp_engine::EmbeddingService;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Embedding store on a local libsql database file
#[derive(Clone)]
pub struct LibsqlVectorStore {
    db: Arc<Database>,
    db_path: PathBuf,
}

/// Timestamps are stored as fixed-width RFC 3339 (microseconds, `Z`) so that
/// text comparison in SQL matches chronological order.
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(format!("bad generated_at '{}': {}", raw, e)))
}

impl LibsqlVectorStore {
    /// Open (or create) the database at `db_path` and initialize the schema
    pub async fn new(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path).build().await.map_err(|e| {
            StoreError::unavailable(format!(
                "Failed to open database at {}: {}",
                db_path.display(),
                e
            ))
        })?;

        let store = Self {
            db: Arc::new(db),
            db_path,
        };
        store.initialize_schema().await?;

        tracing::info!("Vector store opened at {}", store.db_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// PRAGMA statements return rows, so they go through `query()`
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), StoreError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            StoreError::unavailable(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            StoreError::unavailable(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn connect_with_timeout(&self) -> Result<Connection, StoreError> {
        let conn = self.db.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        Ok(conn)
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS embeddings (
                doc_id TEXT PRIMARY KEY,
                vector BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                generated_at TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| {
            StoreError::unavailable(format!("Failed to create embeddings table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS layout_points (
                doc_id TEXT PRIMARY KEY,
                x REAL NOT NULL,
                y REAL NOT NULL,
                version INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| {
            StoreError::unavailable(format!("Failed to create layout_points table: {}", e))
        })?;

        Ok(())
    }

    fn row_to_record(row: &libsql::Row) -> Result<EmbeddingRecord, StoreError> {
        let doc_id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        let dimension: i64 = row.get(2)?;
        let content_hash: String = row.get(3)?;
        let generated_at: String = row.get(4)?;

        if blob.len() % 4 != 0 {
            return Err(StoreError::corrupt(format!(
                "vector blob for '{}' has {} bytes",
                doc_id,
                blob.len()
            )));
        }

        let vector = EmbeddingService::from_blob(&blob);
        if vector.len() as i64 != dimension {
            return Err(StoreError::dimension_mismatch(
                dimension.max(0) as usize,
                vector.len(),
            ));
        }

        Ok(EmbeddingRecord {
            doc_id: DocumentId::from(doc_id),
            vector,
            content_hash: ContentHash::from_hex(content_hash),
            generated_at: parse_timestamp(&generated_at)?,
        })
    }
}

#[async_trait]
impl VectorStore for LibsqlVectorStore {
    async fn upsert(&self, record: EmbeddingRecord) -> Result<UpsertOutcome, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let tx = conn.transaction().await?;

        let incoming_at = format_timestamp(&record.generated_at);

        let mut rows = tx
            .query(
                "SELECT generated_at FROM embeddings WHERE doc_id = ?",
                [record.doc_id.as_str()],
            )
            .await?;
        let existing_at: Option<String> = match rows.next().await? {
            Some(row) => Some(row.get(0)?),
            None => None,
        };
        drop(rows);

        let outcome = match &existing_at {
            None => UpsertOutcome::Inserted,
            Some(stored) if incoming_at.as_str() < stored.as_str() => UpsertOutcome::Stale,
            Some(_) => UpsertOutcome::Replaced,
        };

        if outcome != UpsertOutcome::Stale {
            tx.execute(
                "INSERT INTO embeddings (doc_id, vector, dimension, content_hash, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(doc_id) DO UPDATE SET
                    vector = excluded.vector,
                    dimension = excluded.dimension,
                    content_hash = excluded.content_hash,
                    generated_at = excluded.generated_at
                 WHERE excluded.generated_at >= embeddings.generated_at",
                (
                    record.doc_id.as_str(),
                    EmbeddingService::to_blob(&record.vector),
                    record.vector.len() as i64,
                    record.content_hash.as_str(),
                    incoming_at.as_str(),
                ),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<EmbeddingRecord>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT doc_id, vector, dimension, content_hash, generated_at
                 FROM embeddings WHERE doc_id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &DocumentId) -> Result<bool, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let tx = conn.transaction().await?;

        let removed = tx
            .execute("DELETE FROM embeddings WHERE doc_id = ?", [id.as_str()])
            .await?;
        tx.execute("DELETE FROM layout_points WHERE doc_id = ?", [id.as_str()])
            .await?;

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn all_embeddings(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT doc_id, vector, dimension, content_hash, generated_at
                 FROM embeddings ORDER BY doc_id",
                (),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM embeddings", ()).await?;
        match rows.next().await? {
            Some(row) => {
                let count: i64 = row.get(0)?;
                Ok(count.max(0) as usize)
            }
            None => Ok(0),
        }
    }

    async fn save_layout(&self, points: &[LayoutPoint]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let conn = self.connect_with_timeout().await?;
        let tx = conn.transaction().await?;
        for point in points {
            tx.execute(
                "INSERT OR REPLACE INTO layout_points (doc_id, x, y, version)
                 VALUES (?1, ?2, ?3, ?4)",
                (
                    point.doc_id.as_str(),
                    point.x,
                    point.y,
                    point.version as i64,
                ),
            )
            .await?;
        }
        tx.commit().await?;

        tracing::debug!("Persisted {} layout points", points.len());
        Ok(())
    }

    async fn load_layout(&self) -> Result<Vec<LayoutPoint>, StoreError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT doc_id, x, y, version FROM layout_points ORDER BY doc_id",
                (),
            )
            .await?;

        let mut points = Vec::new();
        while let Some(row) = rows.next().await? {
            let doc_id: String = row.get(0)?;
            let version: i64 = row.get(3)?;
            points.push(LayoutPoint {
                doc_id: DocumentId::from(doc_id),
                x: row.get(1)?,
                y: row.get(2)?,
                version: version.max(0) as u64,
            });
        }
        Ok(points)
    }

    async fn clear_layout(&self) -> Result<(), StoreError> {
        let conn = self.connect_with_timeout().await?;
        conn.execute("DELETE FROM layout_points", ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_text_order_is_chronological() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::microseconds(1);

        let early_raw = format_timestamp(&early);
        let late_raw = format_timestamp(&late);
        assert!(early_raw < late_raw);
        assert_eq!(early_raw, "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_timestamp(&late_raw).unwrap(), late);
    }

    #[test]
    fn test_bad_timestamp_is_corrupt() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(StoreError::Corrupt(_))
        ));
    }
}
