//! Similarity Index
//!
//! Cosine similarity over the current embedding set: ranked neighbour lists
//! and the thresholded edge set drawn between connected documents.
//!
//! # Incremental Policy
//!
//! - `upsert` rescoring touches only the changed document's row (O(N·D))
//! - `rebuild` recomputes every pair, rows in parallel via rayon
//! - Edges with score above `edge_floor` are maintained; lower thresholds
//!   fall back to an exhaustive scan
//!
//! Iteration is over a `BTreeMap`, so every result is deterministic for a
//! given embedding set regardless of insertion order.

use crate::config::{PipelineConfig, SearchStrategy};
use crate::models::{DocumentId, ScoredDocument, SimilarityEdge};
use crate::services::lsh::LshForest;
use notesphere_nlp_engine::l2_normalize;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Dot product of two vectors (cosine similarity for unit vectors)
#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two arbitrary vectors; 0.0 if either is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Descending score, ties by ascending id
fn rank(a: &ScoredDocument, b: &ScoredDocument) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    vectors: BTreeMap<DocumentId, Vec<f32>>,
    /// Symmetric adjacency for scores strictly above `edge_floor`
    edges: BTreeMap<DocumentId, BTreeMap<DocumentId, f32>>,
    edge_floor: f32,
    strategy: SearchStrategy,
    lsh: LshForest,
}

impl SimilarityIndex {
    /// Exhaustive index maintaining edges above `edge_floor`
    pub fn new(edge_floor: f32) -> Self {
        Self::with_strategy(edge_floor, SearchStrategy::Exhaustive, 0, 8, 12)
    }

    pub fn with_strategy(
        edge_floor: f32,
        strategy: SearchStrategy,
        seed: u64,
        lsh_tables: usize,
        lsh_bits: usize,
    ) -> Self {
        Self {
            vectors: BTreeMap::new(),
            edges: BTreeMap::new(),
            edge_floor,
            strategy,
            lsh: LshForest::new(seed, lsh_tables, lsh_bits),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::with_strategy(
            config.similarity_threshold,
            config.search_strategy,
            config.projection.seed,
            config.lsh_tables,
            config.lsh_bits,
        )
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.vectors.keys()
    }

    /// Normalised vector of a document
    pub fn vector(&self, id: &DocumentId) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    /// Normalised vectors in id order
    pub fn iter(&self) -> impl Iterator<Item = (&DocumentId, &[f32])> {
        self.vectors.iter().map(|(id, v)| (id, v.as_slice()))
    }

    pub fn edge_floor(&self) -> f32 {
        self.edge_floor
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    /// Cosine similarity between two indexed documents
    pub fn score(&self, a: &DocumentId, b: &DocumentId) -> Option<f32> {
        let va = self.vectors.get(a)?;
        let vb = self.vectors.get(b)?;
        Some(dot(va, vb))
    }

    fn normalized(vector: &[f32]) -> Vec<f32> {
        let mut v: Vec<f32> = vector
            .iter()
            .map(|x| if x.is_finite() { *x } else { 0.0 })
            .collect();
        l2_normalize(&mut v);
        v
    }

    fn unlink(&mut self, id: &DocumentId) {
        if let Some(row) = self.edges.remove(id) {
            for other in row.keys() {
                if let Some(other_row) = self.edges.get_mut(other) {
                    other_row.remove(id);
                    if other_row.is_empty() {
                        self.edges.remove(other);
                    }
                }
            }
        }
    }

    fn link(&mut self, a: &DocumentId, b: &DocumentId, score: f32) {
        self.edges
            .entry(a.clone())
            .or_default()
            .insert(b.clone(), score);
        self.edges
            .entry(b.clone())
            .or_default()
            .insert(a.clone(), score);
    }

    /// Insert or replace one document and rescore only its row
    pub fn upsert(&mut self, id: DocumentId, vector: &[f32]) {
        let normalized = Self::normalized(vector);
        self.unlink(&id);

        let linked: Vec<(DocumentId, f32)> = self
            .vectors
            .iter()
            .filter(|(other, _)| **other != id)
            .map(|(other, v)| (other.clone(), dot(&normalized, v)))
            .filter(|(_, score)| *score > self.edge_floor)
            .collect();

        for (other, score) in linked {
            self.link(&id, &other, score);
        }

        if self.strategy == SearchStrategy::Approximate {
            self.lsh.insert(&id, &normalized);
        }
        self.vectors.insert(id, normalized);
    }

    /// Drop a document and all its edges
    pub fn remove(&mut self, id: &DocumentId) -> bool {
        self.unlink(id);
        self.lsh.remove(id);
        self.vectors.remove(id).is_some()
    }

    /// Replace the whole embedding set and recompute every pair
    pub fn rebuild<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = (DocumentId, Vec<f32>)>,
    {
        self.vectors = records
            .into_iter()
            .map(|(id, v)| (id, Self::normalized(&v)))
            .collect();
        self.edges.clear();
        self.lsh.clear();

        let entries: Vec<(&DocumentId, &Vec<f32>)> = self.vectors.iter().collect();
        let floor = self.edge_floor;

        let pairs: Vec<(DocumentId, DocumentId, f32)> = entries
            .par_iter()
            .enumerate()
            .flat_map_iter(|(i, (id, v))| {
                entries[i + 1..]
                    .iter()
                    .map(move |(other, w)| ((*id).clone(), (*other).clone(), dot(v, w)))
                    .filter(move |(_, _, score)| *score > floor)
            })
            .collect();

        for (a, b, score) in pairs {
            self.link(&a, &b, score);
        }

        if self.strategy == SearchStrategy::Approximate {
            let vectors: Vec<(DocumentId, Vec<f32>)> = self
                .vectors
                .iter()
                .map(|(id, v)| (id.clone(), v.clone()))
                .collect();
            for (id, v) in vectors {
                self.lsh.insert(&id, &v);
            }
        }

        tracing::debug!(
            "Similarity index rebuilt: {} documents, {} edges",
            self.vectors.len(),
            self.edge_count()
        );
    }

    /// Number of maintained edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum::<usize>() / 2
    }

    /// Edges with score strictly above `threshold`, sorted by `(a, b)`
    pub fn edges_above(&self, threshold: f32) -> Vec<SimilarityEdge> {
        if threshold >= self.edge_floor {
            let mut edges = Vec::new();
            for (a, row) in &self.edges {
                for (b, score) in row.range((Bound::Excluded(a), Bound::Unbounded)) {
                    if *score > threshold {
                        edges.push(SimilarityEdge {
                            a: a.clone(),
                            b: b.clone(),
                            score: *score,
                        });
                    }
                }
            }
            return edges;
        }

        // Below the maintained floor: exhaustive scan
        let entries: Vec<(&DocumentId, &Vec<f32>)> = self.vectors.iter().collect();
        let mut edges = Vec::new();
        for (i, (a, va)) in entries.iter().enumerate() {
            for (b, vb) in &entries[i + 1..] {
                let score = dot(va, vb);
                if score > threshold {
                    edges.push(SimilarityEdge {
                        a: (*a).clone(),
                        b: (*b).clone(),
                        score,
                    });
                }
            }
        }
        edges
    }

    /// The `k` most similar documents to `id`, best first
    pub fn neighbors(&self, id: &DocumentId, k: usize) -> Vec<ScoredDocument> {
        match self.vectors.get(id) {
            Some(vector) => self.nearest_to_vector(vector, k, Some(id)),
            None => Vec::new(),
        }
    }

    /// The `k` indexed documents most similar to an arbitrary vector
    pub fn nearest_to_vector(
        &self,
        vector: &[f32],
        k: usize,
        exclude: Option<&DocumentId>,
    ) -> Vec<ScoredDocument> {
        if k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }
        let query = Self::normalized(vector);

        match self.strategy {
            SearchStrategy::Exhaustive => self.exhaustive_nearest(&query, k, exclude),
            SearchStrategy::Approximate => self.approximate_nearest(&query, k, exclude),
        }
    }

    fn exhaustive_nearest(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<&DocumentId>,
    ) -> Vec<ScoredDocument> {
        let mut scored: Vec<ScoredDocument> = self
            .vectors
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .map(|(id, v)| ScoredDocument {
                doc_id: id.clone(),
                score: dot(query, v),
            })
            .collect();
        scored.sort_by(rank);
        scored.truncate(k);
        scored
    }

    fn approximate_nearest(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<&DocumentId>,
    ) -> Vec<ScoredDocument> {
        let candidates = self.lsh.candidates(query);
        let available = self.vectors.len() - usize::from(exclude.is_some_and(|id| self.contains(id)));

        // Too few candidates to fill k: exhaustive top-up
        if candidates.iter().filter(|id| Some(*id) != exclude).count() < k.min(available) {
            return self.exhaustive_nearest(query, k, exclude);
        }

        let mut scored: Vec<ScoredDocument> = candidates
            .into_iter()
            .filter(|id| Some(id) != exclude)
            .filter_map(|id| {
                let score = dot(query, self.vectors.get(&id)?);
                Some(ScoredDocument { doc_id: id, score })
            })
            .collect();
        scored.sort_by(rank);
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn id(s: &str) -> DocumentId {
        DocumentId::from(s)
    }

    fn sample_index(floor: f32) -> SimilarityIndex {
        let mut index = SimilarityIndex::new(floor);
        index.upsert(id("a"), &[1.0, 0.0, 0.0]);
        index.upsert(id("b"), &[0.9, 0.1, 0.0]);
        index.upsert(id("c"), &[0.0, 1.0, 0.0]);
        index.upsert(id("d"), &[0.0, 0.0, 0.0]);
        index
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_edges_and_neighbors() {
        let index = sample_index(0.7);

        let edges = index.edges_above(0.7);
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].a.as_str(), edges[0].b.as_str()), ("a", "b"));

        let neighbors = index.neighbors(&id("a"), 2);
        assert_eq!(neighbors[0].doc_id, id("b"));
        assert_eq!(neighbors.len(), 2);
        // c and d both score 0 against a; tie broken by id
        assert_eq!(neighbors[1].doc_id, id("c"));
    }

    #[test]
    fn test_zero_vector_has_no_edges() {
        let index = sample_index(0.7);
        assert!(index.edges_above(0.7).iter().all(|e| !e.touches(&id("d"))));
        assert_eq!(index.score(&id("d"), &id("a")), Some(0.0));
        assert_eq!(index.vector(&id("d")), Some(&[0.0, 0.0, 0.0][..]));
    }

    #[test]
    fn test_upsert_replaces_edges() {
        let mut index = sample_index(0.7);
        index.upsert(id("a"), &[0.0, 1.0, 0.0]);

        let edges = index.edges_above(0.7);
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].a.as_str(), edges[0].b.as_str()), ("a", "c"));

        assert!(index.remove(&id("c")));
        assert!(index.edges_above(0.7).is_empty());
        assert!(!index.remove(&id("c")));
    }

    #[test]
    fn test_below_floor_falls_back_to_exhaustive() {
        let index = sample_index(0.9);
        assert_eq!(index.edges_above(0.95).len(), 1);
        let low = index.edges_above(0.5);
        assert_eq!(low.len(), 1);
        assert!(index.edges_above(-0.1).len() > low.len());
    }

    fn random_vectors(seed: u64, n: usize, dim: usize) -> Vec<(DocumentId, Vec<f32>)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let v = (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect();
                (DocumentId::new(format!("doc-{:03}", i)), v)
            })
            .collect()
    }

    #[test]
    fn test_incremental_matches_full_rebuild() {
        let records = random_vectors(3, 40, 8);

        let mut incremental = SimilarityIndex::new(0.3);
        for (doc, v) in &records {
            incremental.upsert(doc.clone(), v);
        }
        // Edit a few documents in place
        let edits = random_vectors(4, 5, 8);
        let mut final_records = records.clone();
        for (i, (_, v)) in edits.into_iter().enumerate() {
            let target = final_records[i * 7].0.clone();
            incremental.upsert(target, &v);
            final_records[i * 7].1 = v;
        }

        let mut full = SimilarityIndex::new(0.3);
        full.rebuild(final_records);

        assert_eq!(incremental.edges_above(0.3), full.edges_above(0.3));
        assert_eq!(incremental.edge_count(), full.edge_count());
    }

    fn clustered_vectors(seed: u64) -> Vec<(DocumentId, Vec<f32>)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let dim = 32;
        let centres: Vec<Vec<f32>> = (0..4)
            .map(|_| (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect())
            .collect();

        let mut out = Vec::new();
        for (c, centre) in centres.iter().enumerate() {
            for i in 0..25 {
                let v = centre
                    .iter()
                    .map(|x| x + rng.random_range(-0.05f32..0.05))
                    .collect();
                out.push((DocumentId::new(format!("c{}-{:02}", c, i)), v));
            }
        }
        out
    }

    #[test]
    fn test_approximate_recall_against_exhaustive() {
        let records = clustered_vectors(9);

        let mut exact = SimilarityIndex::new(0.7);
        exact.rebuild(records.clone());
        let mut approx =
            SimilarityIndex::with_strategy(0.7, SearchStrategy::Approximate, 42, 8, 12);
        approx.rebuild(records.clone());

        let k = 5;
        let mut hits = 0;
        let mut total = 0;
        for (doc, _) in &records {
            let truth: Vec<DocumentId> =
                exact.neighbors(doc, k).into_iter().map(|s| s.doc_id).collect();
            let found: Vec<DocumentId> =
                approx.neighbors(doc, k).into_iter().map(|s| s.doc_id).collect();
            hits += truth.iter().filter(|t| found.contains(t)).count();
            total += truth.len();
        }

        let recall = hits as f64 / total as f64;
        assert!(recall >= 0.9, "recall {} below 0.9", recall);

        // Edge sets are maintained exactly regardless of strategy
        assert_eq!(exact.edges_above(0.7), approx.edges_above(0.7));
    }

    #[test]
    fn test_from_config_uses_threshold_and_strategy() {
        let config = crate::config::PipelineConfig {
            similarity_threshold: 0.55,
            search_strategy: SearchStrategy::Approximate,
            ..Default::default()
        };
        let index = SimilarityIndex::from_config(&config);
        assert_eq!(index.edge_floor(), 0.55);
        assert_eq!(index.strategy(), SearchStrategy::Approximate);

        assert_eq!(SimilarityIndex::new(0.7).strategy(), SearchStrategy::Exhaustive);
    }

    #[test]
    fn test_approximate_is_deterministic() {
        let records = clustered_vectors(5);
        let build = || {
            let mut index =
                SimilarityIndex::with_strategy(0.7, SearchStrategy::Approximate, 1, 6, 10);
            index.rebuild(records.clone());
            index.neighbors(&records[3].0, 6)
        };
        assert_eq!(build(), build());
    }

    proptest! {
        #[test]
        fn prop_threshold_monotonicity(
            seed in 0u64..500,
            low in -1.0f32..1.0,
            delta in 0.0f32..1.0,
        ) {
            let mut index = SimilarityIndex::new(0.2);
            index.rebuild(random_vectors(seed, 15, 6));
            let high = (low + delta).min(1.0);
            prop_assert!(index.edges_above(high).len() <= index.edges_above(low).len());
        }

        #[test]
        fn prop_rebuild_is_order_independent(seed in 0u64..200) {
            let records = random_vectors(seed, 12, 5);
            let mut reversed = records.clone();
            reversed.reverse();

            let mut first = SimilarityIndex::new(0.1);
            first.rebuild(records);
            let mut second = SimilarityIndex::new(0.1);
            second.rebuild(reversed);
            prop_assert_eq!(first.edges_above(0.1), second.edges_above(0.1));
        }
    }
}
