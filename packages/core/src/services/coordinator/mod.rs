//! Update Coordinator
//!
//! Orchestrates the pipeline for every document change:
//! `Received → Embedding → Indexing → Projecting → Published`.
//!
//! Embedding runs on the blocking pool and may proceed for many documents at
//! once. Everything that touches shared corpus state (the vector store writes,
//! the similarity index and the projection engine) goes through a single
//! writer task fed by an `mpsc` queue. Readers observe published
//! [`LayoutSnapshot`]s through a `watch` channel.
//!
//! Changes to the same document are coalesced by sequence number: a run that
//! is overtaken by a newer change (or a delete) is abandoned before it writes
//! anything, and reported as [`ChangeOutcome::Superseded`].

mod writer;

use crate::config::PipelineConfig;
use crate::db::VectorStore;
use crate::models::{ContentHash, Document, DocumentId, EmbeddingRecord, LayoutSnapshot, ScoredDocument};
use crate::services::error::PipelineError;
use crate::services::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::services::projection::ProjectionEngine;
use crate::services::similarity_index::{cosine_similarity, SimilarityIndex};
use notesphere_nlp_engine::{validate_text, TextEncoder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;
use writer::{Op, Writer, WriterCommand};

/// Queue depth of the writer's command channel
const COMMAND_QUEUE: usize = 1024;

/// Where a change currently is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Embedding,
    Indexing,
    Projecting,
    Published,
}

impl PipelineStage {
    fn log(self, id: &DocumentId) {
        tracing::debug!(doc_id = %id, stage = ?self, "pipeline stage");
    }
}

/// How a change request ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeOutcome {
    /// Embedded, indexed, projected and included in snapshot `version`
    Published {
        version: u64,
        latency: Duration,
        budget_exceeded: bool,
    },
    /// The document is absent from snapshot `version` onwards
    Removed { version: u64 },
    /// Content hash matches the stored embedding; nothing to do
    Unchanged,
    /// A newer change to the same document overtook this one
    Superseded,
}

impl ChangeOutcome {
    pub fn version(&self) -> Option<u64> {
        match self {
            Self::Published { version, .. } | Self::Removed { version } => Some(*version),
            Self::Unchanged | Self::Superseded => None,
        }
    }
}

/// Result of a bulk [`CoordinatorHandle::reconcile`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Documents whose embedding was (re)generated
    pub embedded: usize,
    /// Stored embeddings dropped because their document is gone or empty
    pub removed: usize,
    /// Documents whose stored embedding was already current
    pub unchanged: usize,
    /// Documents the encoder could not embed, with the reason
    pub failed: Vec<(DocumentId, String)>,
    /// Snapshot version reflecting the reconciled corpus
    pub version: u64,
}

#[derive(Default)]
struct Sequences {
    counter: u64,
    latest: HashMap<DocumentId, u64>,
}

/// Per-document change sequence numbers
#[derive(Default)]
struct SequenceTracker {
    inner: Mutex<Sequences>,
}

impl SequenceTracker {
    /// Register a new change to `id`, superseding every earlier one
    fn advance(&self, id: &DocumentId) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.counter += 1;
        let seq = inner.counter;
        inner.latest.insert(id.clone(), seq);
        seq
    }

    fn is_current(&self, id: &DocumentId, seq: u64) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.latest.get(id).copied() == Some(seq)
    }

    /// Drop the entry of a deleted document unless a newer change arrived
    fn forget(&self, id: &DocumentId, seq: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.latest.get(id).copied() == Some(seq) {
            inner.latest.remove(id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).latest.len()
    }
}

/// State shared by every handle and the writer task
struct Shared {
    config: PipelineConfig,
    encoder: Arc<dyn TextEncoder>,
    store: Arc<dyn VectorStore>,
    sequences: SequenceTracker,
    metrics: PipelineMetrics,
}

pub struct LayoutCoordinator;

impl LayoutCoordinator {
    /// Bootstrap corpus state from the store and start the writer task
    ///
    /// Must be called from within a tokio runtime. Publishes snapshot
    /// version 1 before returning.
    pub async fn start(
        config: PipelineConfig,
        encoder: Arc<dyn TextEncoder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<CoordinatorHandle, PipelineError> {
        config.validate().map_err(PipelineError::config)?;

        let started = Instant::now();
        let dimension = encoder.dimension();

        let records = store.all_embeddings().await?;
        let total = records.len();
        let records: Vec<EmbeddingRecord> = records
            .into_iter()
            .filter(|r| r.dimension() == dimension)
            .collect();
        if records.len() < total {
            tracing::warn!(
                "Ignoring {} stored embeddings with a dimension other than {}; reconcile to regenerate them",
                total - records.len(),
                dimension
            );
        }

        let mut index = SimilarityIndex::from_config(&config);
        index.rebuild(records.into_iter().map(|r| (r.doc_id, r.vector)));

        let stored_layout = store.load_layout().await?;
        let persisted = stored_layout.len();
        let layout: Vec<_> = stored_layout
            .into_iter()
            .filter(|p| index.contains(&p.doc_id))
            .collect();
        let pruned = persisted - layout.len();

        let k = config.neighbor_count;
        let mut engine = ProjectionEngine::new(
            config.projection.clone(),
            config.rebuild_trigger_edit_count,
        );

        if layout.is_empty() {
            if !index.is_empty() {
                engine.rebuild(&index, k);
            }
        } else {
            engine.restore(layout, &index, k);
            let missing: Vec<DocumentId> = index
                .ids()
                .filter(|id| !engine.contains(id))
                .cloned()
                .collect();
            for id in &missing {
                let neighbors = index.neighbors(id, k);
                engine.insert(id, &neighbors);
            }
            if !missing.is_empty() {
                tracing::debug!("Placed {} documents missing from the stored layout", missing.len());
            }
        }

        if pruned > 0 {
            tracing::debug!("Pruning {} stored layout points with no embedding", pruned);
            store.clear_layout().await?;
            store.save_layout(&engine.points()).await?;
            engine.take_dirty();
        } else {
            let dirty = engine.take_dirty();
            if !dirty.is_empty() {
                if let Err(e) = store.save_layout(&dirty).await {
                    tracing::warn!("Failed to persist bootstrap layout: {}", e);
                }
            }
        }

        let version = 1;
        let snapshot = writer::build_snapshot(&index, &engine, config.similarity_threshold, version);
        let (publisher, snapshots) = watch::channel(Arc::new(snapshot));
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);

        tracing::info!(
            "Layout coordinator ready: {} documents, {} edges, encoder '{}' ({}d), bootstrap {:?}",
            index.len(),
            index.edge_count(),
            encoder.name(),
            dimension,
            started.elapsed()
        );

        let shared = Arc::new(Shared {
            config,
            encoder,
            store,
            sequences: SequenceTracker::default(),
            metrics: PipelineMetrics::new(),
        });

        let writer = Writer {
            shared: shared.clone(),
            index,
            engine,
            version,
            publisher,
            commands: receiver,
        };
        tokio::spawn(writer.run());

        Ok(CoordinatorHandle {
            shared,
            commands,
            snapshots,
        })
    }
}

/// Cloneable entry point to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<WriterCommand>,
    snapshots: watch::Receiver<Arc<LayoutSnapshot>>,
}

impl CoordinatorHandle {
    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// A document was created or edited
    ///
    /// Resolves once the change is published, found unchanged, or superseded.
    /// Empty content withdraws the document from the layout and is rejected
    /// with [`PipelineError::InvalidInput`].
    pub async fn document_changed(
        &self,
        id: DocumentId,
        content: String,
        content_hash: ContentHash,
    ) -> Result<ChangeOutcome, PipelineError> {
        let span = tracing::debug_span!("document_changed", doc_id = %id);
        self.run_change(id, content, content_hash)
            .instrument(span)
            .await
    }

    async fn run_change(
        &self,
        id: DocumentId,
        content: String,
        content_hash: ContentHash,
    ) -> Result<ChangeOutcome, PipelineError> {
        let received = Instant::now();
        PipelineStage::Received.log(&id);
        let seq = self.shared.sequences.advance(&id);

        if let Err(e) = validate_text(&content) {
            // Empty content has no embedding; make sure no stale one lingers
            self.send_op(Op::Remove { id: id.clone(), seq }, received)
                .await?;
            return Err(e.into());
        }

        if self.shared.config.debounce_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.shared.config.debounce_ms)).await;
        }
        if !self.shared.sequences.is_current(&id, seq) {
            return Ok(self.superseded());
        }

        let stored = match self.shared.store.get(&id).await {
            Ok(stored) => stored,
            Err(e) => {
                self.shared.metrics.record_store_failure();
                tracing::error!("Vector store lookup failed for {}: {}", id, e);
                return Err(e.into());
            }
        };
        if let Some(record) = stored {
            if record.is_current_for(&content_hash)
                && record.dimension() == self.shared.encoder.dimension()
                && self.snapshot().contains(&id)
            {
                self.shared.metrics.record_unchanged();
                tracing::debug!("Content of {} unchanged; skipping", id);
                return Ok(ChangeOutcome::Unchanged);
            }
        }

        PipelineStage::Embedding.log(&id);
        let vector = self.embed(content).await?;
        if !self.shared.sequences.is_current(&id, seq) {
            return Ok(self.superseded());
        }

        let record = EmbeddingRecord::new(id, vector, content_hash);
        self.send_op(Op::Upsert { record, seq }, received).await
    }

    /// A document was deleted; its point and every edge touching it disappear
    pub async fn document_deleted(&self, id: DocumentId) -> Result<ChangeOutcome, PipelineError> {
        let received = Instant::now();
        let seq = self.shared.sequences.advance(&id);
        tracing::debug!("Deleting {}", id);
        self.send_op(Op::Remove { id, seq }, received).await
    }

    /// Full global re-projection; returns the published snapshot version
    pub async fn rebuild(&self) -> Result<u64, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(WriterCommand::Rebuild { reply }).await?;
        rx.await.map_err(|_| PipelineError::CoordinatorClosed)?
    }

    /// Bring the store in line with the full set of live documents
    ///
    /// Drops embeddings of documents that no longer exist (or are empty),
    /// embeds every missing or stale one in parallel (all of them when
    /// `force` is set), then rebuilds the index and the layout.
    pub async fn reconcile(
        &self,
        documents: &[Document],
        force: bool,
    ) -> Result<ReconcileReport, PipelineError> {
        let stored: HashMap<DocumentId, EmbeddingRecord> = self
            .shared
            .store
            .all_embeddings()
            .await?
            .into_iter()
            .map(|r| (r.doc_id.clone(), r))
            .collect();

        let dimension = self.shared.encoder.dimension();
        let live: BTreeSet<&DocumentId> = documents
            .iter()
            .filter(|d| d.is_embeddable())
            .map(|d| &d.id)
            .collect();

        let removals: Vec<(DocumentId, u64)> = stored
            .keys()
            .filter(|id| !live.contains(id))
            .map(|id| (id.clone(), self.shared.sequences.advance(id)))
            .collect();

        let mut unchanged = 0;
        let mut jobs = Vec::new();
        let mut queued = BTreeSet::new();
        for doc in documents.iter().filter(|d| d.is_embeddable()) {
            if !queued.insert(&doc.id) {
                continue;
            }
            let current = stored
                .get(&doc.id)
                .is_some_and(|r| r.is_current_for(&doc.content_hash) && r.dimension() == dimension);
            if current && !force {
                unchanged += 1;
                continue;
            }
            let seq = self.shared.sequences.advance(&doc.id);
            jobs.push((doc.id.clone(), doc.content.clone(), doc.content_hash.clone(), seq));
        }

        tracing::info!(
            "Reconciling {} documents: {} to embed, {} to remove",
            live.len(),
            jobs.len(),
            removals.len()
        );

        let encoder = self.shared.encoder.clone();
        let results = tokio::task::spawn_blocking(move || {
            jobs.into_par_iter()
                .map(|(id, content, hash, seq)| {
                    let result = encoder.embed(&content);
                    (id, hash, seq, result)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| PipelineError::embedding_failed(format!("Embedding task failed: {}", e)))?;

        let mut upserts = Vec::new();
        let mut failed = Vec::new();
        for (id, hash, seq, result) in results {
            match result {
                Ok(vector) if vector.len() == dimension => {
                    upserts.push((EmbeddingRecord::new(id, vector, hash), seq));
                }
                Ok(vector) => failed.push((
                    id,
                    format!("Encoder returned {} dimensions, expected {}", vector.len(), dimension),
                )),
                Err(e) => {
                    tracing::warn!("Could not embed {}: {}", id, e);
                    failed.push((id, e.to_string()));
                }
            }
        }

        let embedded = upserts.len();
        let removed = removals.len();
        let (reply, rx) = oneshot::channel();
        self.send(WriterCommand::Reconcile {
            removals,
            upserts,
            reply,
        })
        .await?;
        let version = rx.await.map_err(|_| PipelineError::CoordinatorClosed)??;

        Ok(ReconcileReport {
            embedded,
            removed,
            unchanged,
            failed,
            version,
        })
    }

    /// Rank stored documents against ad-hoc query text, best first
    ///
    /// Reads the vector store directly and mutates nothing.
    pub async fn query_by_similarity(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<ScoredDocument>, PipelineError> {
        validate_text(text)?;

        let encoder = self.shared.encoder.clone();
        let query = text.to_string();
        let vector = tokio::task::spawn_blocking(move || encoder.embed_query(&query))
            .await
            .map_err(|e| PipelineError::embedding_failed(format!("Embedding task failed: {}", e)))??;

        let records = self.shared.store.all_embeddings().await?;
        let mut ranked: Vec<ScoredDocument> = records
            .par_iter()
            .filter(|r| r.dimension() == vector.len())
            .map(|r| ScoredDocument {
                doc_id: r.doc_id.clone(),
                score: cosine_similarity(&vector, &r.vector),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<LayoutSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Arc<LayoutSnapshot>> {
        self.snapshots.clone()
    }

    /// Wait until a snapshot with at least `version` is published
    pub async fn wait_for_version(&self, version: u64) -> Result<Arc<LayoutSnapshot>, PipelineError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| s.version >= version)
            .await
            .map_err(|_| PipelineError::CoordinatorClosed)?;
        Ok(snapshot.clone())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Persist the full layout and stop the writer
    ///
    /// Commands queued before the call are still applied. Calling it again
    /// is a no-op.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(WriterCommand::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    async fn embed(&self, content: String) -> Result<Vec<f32>, PipelineError> {
        let encoder = self.shared.encoder.clone();
        let dimension = encoder.dimension();
        let vector = tokio::task::spawn_blocking(move || encoder.embed(&content))
            .await
            .map_err(|e| PipelineError::embedding_failed(format!("Embedding task failed: {}", e)))??;

        if vector.len() != dimension {
            return Err(PipelineError::embedding_failed(format!(
                "Encoder returned {} dimensions, expected {}",
                vector.len(),
                dimension
            )));
        }
        Ok(vector)
    }

    fn superseded(&self) -> ChangeOutcome {
        self.shared.metrics.record_superseded();
        ChangeOutcome::Superseded
    }

    async fn send_op(&self, op: Op, received: Instant) -> Result<ChangeOutcome, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(WriterCommand::Apply {
            op,
            received,
            reply,
        })
        .await?;
        rx.await.map_err(|_| PipelineError::CoordinatorClosed)?
    }

    async fn send(&self, command: WriterCommand) -> Result<(), PipelineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PipelineError::CoordinatorClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_tracker_supersedes_older_changes() {
        let tracker = SequenceTracker::default();
        let id = DocumentId::from("a");
        let first = tracker.advance(&id);
        assert!(tracker.is_current(&id, first));

        let second = tracker.advance(&id);
        assert!(second > first);
        assert!(!tracker.is_current(&id, first));
        assert!(tracker.is_current(&id, second));
    }

    #[test]
    fn test_sequences_are_per_document() {
        let tracker = SequenceTracker::default();
        let a = tracker.advance(&DocumentId::from("a"));
        tracker.advance(&DocumentId::from("b"));
        assert!(tracker.is_current(&DocumentId::from("a"), a));
        assert!(!tracker.is_current(&DocumentId::from("c"), a));
    }

    #[test]
    fn test_forget_keeps_newer_changes() {
        let tracker = SequenceTracker::default();
        let id = DocumentId::from("a");
        let deleted = tracker.advance(&id);
        let edited = tracker.advance(&id);

        tracker.forget(&id, deleted);
        assert!(tracker.is_current(&id, edited));

        tracker.forget(&id, edited);
        assert!(!tracker.is_current(&id, edited));
        assert_eq!(tracker.tracked(), 0);
    }

    #[tokio::test]
    async fn test_deleted_documents_release_their_sequence() {
        use crate::db::MemoryVectorStore;
        use notesphere_nlp_engine::{HashingEncoder, EMBEDDING_DIMENSION};

        let encoder: Arc<dyn TextEncoder> = Arc::new(HashingEncoder::new(EMBEDDING_DIMENSION));
        let store = Arc::new(MemoryVectorStore::new());
        let handle = LayoutCoordinator::start(PipelineConfig::default(), encoder, store)
            .await
            .unwrap();

        for i in 0..5 {
            let id = DocumentId::new(format!("note-{}", i));
            let text = format!("short lived note number {}", i);
            handle
                .document_changed(id.clone(), text.clone(), ContentHash::of(&text))
                .await
                .unwrap();
            handle.document_deleted(id).await.unwrap();
        }

        assert_eq!(handle.shared.sequences.tracked(), 0);
        assert!(handle.snapshot().is_empty());
    }

    #[test]
    fn test_outcome_version() {
        let published = ChangeOutcome::Published {
            version: 4,
            latency: Duration::from_millis(3),
            budget_exceeded: false,
        };
        assert_eq!(published.version(), Some(4));
        assert_eq!(ChangeOutcome::Removed { version: 5 }.version(), Some(5));
        assert_eq!(ChangeOutcome::Unchanged.version(), None);
        assert_eq!(ChangeOutcome::Superseded.version(), None);
    }
}
