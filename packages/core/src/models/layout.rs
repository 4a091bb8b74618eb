//! Layout Points, Similarity Edges and Snapshots
//!
//! A [`LayoutSnapshot`] is the unit published to rendering consumers: every
//! current point plus the thresholded similarity edges between them, stamped
//! with a monotonically increasing version.

use super::document::DocumentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 2D position of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPoint {
    pub doc_id: DocumentId,
    pub x: f64,
    pub y: f64,

    /// Layout version at which this point last moved
    pub version: u64,
}

impl LayoutPoint {
    pub fn distance_to(&self, other: &LayoutPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Unordered pair of documents whose similarity exceeds the connection threshold
///
/// Stored canonically with `a < b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub a: DocumentId,
    pub b: DocumentId,
    pub score: f32,
}

impl SimilarityEdge {
    /// Build an edge, ordering the endpoints canonically
    pub fn new(first: DocumentId, second: DocumentId, score: f32) -> Self {
        if first <= second {
            Self {
                a: first,
                b: second,
                score,
            }
        } else {
            Self {
                a: second,
                b: first,
                score,
            }
        }
    }

    pub fn touches(&self, id: &DocumentId) -> bool {
        &self.a == id || &self.b == id
    }

    pub fn connects(&self, first: &DocumentId, second: &DocumentId) -> bool {
        (&self.a == first && &self.b == second) || (&self.a == second && &self.b == first)
    }
}

/// A document with a similarity score, as returned by neighbour and search queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredDocument {
    pub doc_id: DocumentId,
    pub score: f32,
}

/// Full published layout state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSnapshot {
    /// Points sorted by document id
    pub points: Vec<LayoutPoint>,

    /// Edges sorted by `(a, b)`, every endpoint present in `points`
    pub edges: Vec<SimilarityEdge>,

    /// Strictly increasing publish counter
    pub version: u64,

    /// Number of full rebuilds the layout has gone through
    pub layout_epoch: u64,

    pub generated_at: DateTime<Utc>,
}

impl LayoutSnapshot {
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            edges: Vec::new(),
            version: 0,
            layout_epoch: 0,
            generated_at: Utc::now(),
        }
    }

    pub fn point(&self, id: &DocumentId) -> Option<&LayoutPoint> {
        self.points
            .binary_search_by(|p| p.doc_id.cmp(id))
            .ok()
            .map(|idx| &self.points[idx])
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.point(id).is_some()
    }

    pub fn edge_between(&self, first: &DocumentId, second: &DocumentId) -> Option<&SimilarityEdge> {
        self.edges.iter().find(|e| e.connects(first, second))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Every edge references two points present in this snapshot
    pub fn is_consistent(&self) -> bool {
        let ids: BTreeSet<&DocumentId> = self.points.iter().map(|p| &p.doc_id).collect();
        self.edges
            .iter()
            .all(|e| ids.contains(&e.a) && ids.contains(&e.b))
    }
}
