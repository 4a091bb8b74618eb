//! The single writer task
//!
//! Owns the similarity index, the projection engine and the snapshot version.
//! Every mutation of corpus state happens here, one batch at a time, and each
//! batch ends with at most one published snapshot.

use super::{ChangeOutcome, PipelineStage, Shared};
use crate::db::{StoreError, UpsertOutcome};
use crate::models::{DocumentId, EmbeddingRecord, LayoutSnapshot};
use crate::services::error::PipelineError;
use crate::services::projection::{ProjectionEngine, ProjectionReport};
use crate::services::similarity_index::SimilarityIndex;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};

pub(super) type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

/// One document-level mutation
pub(super) enum Op {
    Upsert { record: EmbeddingRecord, seq: u64 },
    Remove { id: DocumentId, seq: u64 },
}

pub(super) enum WriterCommand {
    Apply {
        op: Op,
        received: Instant,
        reply: Reply<ChangeOutcome>,
    },
    Rebuild {
        reply: Reply<u64>,
    },
    Reconcile {
        removals: Vec<(DocumentId, u64)>,
        upserts: Vec<(EmbeddingRecord, u64)>,
        reply: Reply<u64>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Applied {
    /// Corpus state changed; the reply waits for the batch's snapshot
    Changed,
    Removed,
    /// Nothing to publish
    Settled(ChangeOutcome),
}

/// Replies held until the batch's snapshot is published
enum Pending {
    Published {
        id: DocumentId,
        received: Instant,
        reply: Reply<ChangeOutcome>,
    },
    Removed {
        reply: Reply<ChangeOutcome>,
    },
    Version {
        reply: Reply<u64>,
    },
}

pub(super) struct Writer {
    pub(super) shared: Arc<Shared>,
    pub(super) index: SimilarityIndex,
    pub(super) engine: ProjectionEngine,
    pub(super) version: u64,
    pub(super) publisher: watch::Sender<Arc<LayoutSnapshot>>,
    pub(super) commands: mpsc::Receiver<WriterCommand>,
}

impl Writer {
    pub(super) async fn run(mut self) {
        tracing::info!("Layout writer started at version {}", self.version);

        while let Some(first) = self.commands.recv().await {
            let mut batch = vec![first];
            while batch.len() < self.shared.config.max_batch {
                match self.commands.try_recv() {
                    Ok(command) => batch.push(command),
                    Err(_) => break,
                }
            }

            if let Some(reply) = self.process(batch).await {
                self.persist_all().await;
                let _ = reply.send(());
                tracing::info!("Layout writer stopped at version {}", self.version);
                return;
            }
        }

        tracing::info!("Layout writer stopped: all handles dropped");
    }

    /// Apply one batch; returns the shutdown reply if the batch asked to stop
    async fn process(&mut self, batch: Vec<WriterCommand>) -> Option<oneshot::Sender<()>> {
        self.engine.begin_batch();

        let mut changed = false;
        let mut reload = false;
        let mut rebuild_requested = false;
        let mut pending: Vec<Pending> = Vec::new();
        let mut shutdown = None;

        tracing::debug!("Writer batch of {} commands", batch.len());

        for command in batch {
            match command {
                WriterCommand::Apply {
                    op,
                    received,
                    reply,
                } => {
                    let id = match &op {
                        Op::Upsert { record, .. } => record.doc_id.clone(),
                        Op::Remove { id, .. } => id.clone(),
                    };
                    match self.apply(op).await {
                        Ok(Applied::Changed) => {
                            changed = true;
                            pending.push(Pending::Published {
                                id,
                                received,
                                reply,
                            });
                        }
                        Ok(Applied::Removed) => {
                            changed = true;
                            pending.push(Pending::Removed { reply });
                        }
                        Ok(Applied::Settled(outcome)) => {
                            let _ = reply.send(Ok(outcome));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                WriterCommand::Rebuild { reply } => {
                    rebuild_requested = true;
                    pending.push(Pending::Version { reply });
                }
                WriterCommand::Reconcile {
                    removals,
                    upserts,
                    reply,
                } => match self.apply_reconcile(removals, upserts).await {
                    Ok(()) => {
                        reload = true;
                        rebuild_requested = true;
                        pending.push(Pending::Version { reply });
                    }
                    Err(e) => {
                        // Partial writes may have landed; reload so memory matches the store
                        reload = true;
                        let _ = reply.send(Err(e));
                    }
                },
                WriterCommand::Shutdown { reply } => shutdown = Some(reply),
            }
        }

        if reload {
            match self.reload_index().await {
                Ok(()) => changed = true,
                Err(e) => {
                    let message = e.to_string();
                    rebuild_requested = false;
                    pending = pending
                        .into_iter()
                        .filter_map(|p| match p {
                            Pending::Version { reply } => {
                                let _ = reply.send(Err(StoreError::unavailable(message.clone()).into()));
                                None
                            }
                            other => Some(other),
                        })
                        .collect();
                }
            }
        }

        if rebuild_requested || (changed && self.engine.needs_rebuild()) {
            let report = self.engine.rebuild(&self.index, self.shared.config.neighbor_count);
            self.shared.metrics.record_rebuild();
            self.note_report(report);
            changed = true;
        }

        if changed {
            self.publish();
        }
        self.answer(pending);

        let dirty = self.engine.take_dirty();
        if !dirty.is_empty() {
            if let Err(e) = self.shared.store.save_layout(&dirty).await {
                tracing::warn!("Failed to persist {} layout points: {}", dirty.len(), e);
            }
        }

        shutdown
    }

    async fn apply(&mut self, op: Op) -> Result<Applied, PipelineError> {
        match op {
            Op::Upsert { record, seq } => {
                let id = record.doc_id.clone();
                if !self.shared.sequences.is_current(&id, seq) {
                    tracing::debug!("Dropping superseded update for {}", id);
                    self.shared.metrics.record_superseded();
                    return Ok(Applied::Settled(ChangeOutcome::Superseded));
                }

                let vector = record.vector.clone();
                match self.shared.store.upsert(record).await {
                    Err(e) => {
                        self.shared.metrics.record_store_failure();
                        tracing::error!("Vector store rejected update for {}: {}", id, e);
                        return Err(e.into());
                    }
                    Ok(UpsertOutcome::Stale) => {
                        tracing::warn!("StaleWrite: newer embedding already stored for {}", id);
                        self.shared.metrics.record_stale_write();
                        return Ok(Applied::Settled(ChangeOutcome::Superseded));
                    }
                    Ok(_) => {}
                }

                PipelineStage::Indexing.log(&id);
                self.index.upsert(id.clone(), &vector);

                PipelineStage::Projecting.log(&id);
                let neighbors = self.index.neighbors(&id, self.shared.config.neighbor_count);
                let report = if self.engine.contains(&id) {
                    self.engine.reinsert(&id, &neighbors)
                } else {
                    self.engine.insert(&id, &neighbors)
                };
                self.note_report(report);
                Ok(Applied::Changed)
            }
            Op::Remove { id, seq } => {
                if !self.shared.sequences.is_current(&id, seq) {
                    self.shared.metrics.record_superseded();
                    return Ok(Applied::Settled(ChangeOutcome::Superseded));
                }

                if let Err(e) = self.shared.store.remove(&id).await {
                    self.shared.metrics.record_store_failure();
                    tracing::error!("Vector store failed to remove {}: {}", id, e);
                    return Err(e.into());
                }

                self.shared.sequences.forget(&id, seq);

                let indexed = self.index.remove(&id);
                let placed = self.engine.remove(&id);
                if indexed || placed {
                    tracing::debug!("Removed {} from the layout", id);
                    Ok(Applied::Removed)
                } else {
                    Ok(Applied::Settled(ChangeOutcome::Removed {
                        version: self.version,
                    }))
                }
            }
        }
    }

    async fn apply_reconcile(
        &mut self,
        removals: Vec<(DocumentId, u64)>,
        upserts: Vec<(EmbeddingRecord, u64)>,
    ) -> Result<(), PipelineError> {
        for (id, seq) in removals {
            if !self.shared.sequences.is_current(&id, seq) {
                continue;
            }
            if let Err(e) = self.shared.store.remove(&id).await {
                self.shared.metrics.record_store_failure();
                return Err(e.into());
            }
            self.shared.sequences.forget(&id, seq);
        }

        for (record, seq) in upserts {
            if !self.shared.sequences.is_current(&record.doc_id, seq) {
                self.shared.metrics.record_superseded();
                continue;
            }
            let id = record.doc_id.clone();
            match self.shared.store.upsert(record).await {
                Ok(UpsertOutcome::Stale) => {
                    tracing::warn!("StaleWrite: newer embedding already stored for {}", id);
                    self.shared.metrics.record_stale_write();
                }
                Ok(_) => {}
                Err(e) => {
                    self.shared.metrics.record_store_failure();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Rebuild the similarity index from the store's full embedding set
    async fn reload_index(&mut self) -> Result<(), StoreError> {
        let records = match self.shared.store.all_embeddings().await {
            Ok(records) => records,
            Err(e) => {
                self.shared.metrics.record_store_failure();
                tracing::error!("Failed to reload embeddings: {}", e);
                return Err(e);
            }
        };

        let dimension = self.shared.encoder.dimension();
        self.index.rebuild(
            records
                .into_iter()
                .filter(|r| r.dimension() == dimension)
                .map(|r| (r.doc_id, r.vector)),
        );

        // Drop points whose embedding is gone
        let indexed: BTreeSet<DocumentId> = self.index.ids().cloned().collect();
        let orphans: Vec<DocumentId> = self
            .engine
            .points()
            .into_iter()
            .map(|p| p.doc_id)
            .filter(|id| !indexed.contains(id))
            .collect();
        for id in orphans {
            self.engine.remove(&id);
        }
        Ok(())
    }

    fn note_report(&self, report: ProjectionReport) {
        if report.degenerate {
            self.shared.metrics.record_degenerate();
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        let snapshot = build_snapshot(
            &self.index,
            &self.engine,
            self.shared.config.similarity_threshold,
            self.version,
        );
        tracing::debug!(
            "Published snapshot v{}: {} points, {} edges",
            snapshot.version,
            snapshot.points.len(),
            snapshot.edges.len()
        );
        self.publisher.send_replace(Arc::new(snapshot));
    }

    fn answer(&self, pending: Vec<Pending>) {
        let budget = self.shared.config.latency_budget();
        for p in pending {
            match p {
                Pending::Published {
                    id,
                    received,
                    reply,
                } => {
                    let latency = received.elapsed();
                    let budget_exceeded = latency > budget;
                    if budget_exceeded {
                        tracing::warn!(
                            "BudgetExceeded: {} published after {:?} (budget {:?})",
                            id,
                            latency,
                            budget
                        );
                    }
                    self.shared.metrics.record_published(latency, budget_exceeded);
                    PipelineStage::Published.log(&id);
                    let _ = reply.send(Ok(ChangeOutcome::Published {
                        version: self.version,
                        latency,
                        budget_exceeded,
                    }));
                }
                Pending::Removed { reply } => {
                    let _ = reply.send(Ok(ChangeOutcome::Removed {
                        version: self.version,
                    }));
                }
                Pending::Version { reply } => {
                    let _ = reply.send(Ok(self.version));
                }
            }
        }
    }

    async fn persist_all(&mut self) {
        self.engine.take_dirty();
        let points = self.engine.points();
        if let Err(e) = self.shared.store.save_layout(&points).await {
            tracing::warn!("Failed to persist layout on shutdown: {}", e);
        }
    }
}

/// Assemble a snapshot; edges are restricted to placed points
pub(super) fn build_snapshot(
    index: &SimilarityIndex,
    engine: &ProjectionEngine,
    threshold: f32,
    version: u64,
) -> LayoutSnapshot {
    let points = engine.points();
    let placed: BTreeSet<&DocumentId> = points.iter().map(|p| &p.doc_id).collect();
    let edges = index
        .edges_above(threshold)
        .into_iter()
        .filter(|e| placed.contains(&e.a) && placed.contains(&e.b))
        .collect();

    LayoutSnapshot {
        points,
        edges,
        version,
        layout_epoch: engine.layout_epoch(),
        generated_at: Utc::now(),
    }
}
