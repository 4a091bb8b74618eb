//! Projection Engine
//!
//! Persistent 2D layout state for the whole corpus with localized update
//! operators:
//!
//! - `insert` / `reinsert`: neighbour-seeded placement, bounded local
//!   refinement, neighbour relaxation clamped to `stability_epsilon`
//! - `remove`: drops one point, nothing else moves
//! - `rebuild`: seeded global reduction (PCA + kNN refinement), canvas fit,
//!   de-overlap, then Procrustes alignment onto the previous layout
//!
//! Between two calls to [`ProjectionEngine::begin_batch`] no point other than
//! the inserted one moves further than `stability_epsilon` from where the
//! batch found it.

mod pca;
mod refine;

use crate::config::ProjectionConfig;
use crate::models::{DocumentId, LayoutPoint, ScoredDocument};
use crate::services::similarity_index::SimilarityIndex;
use refine::{Link, COINCIDENT};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Golden angle in radians, for the degenerate spiral placement
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// What a projection operation did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionReport {
    /// Fell back to deterministic jitter placement
    pub degenerate: bool,

    /// Points whose coordinates changed
    pub moved: usize,
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    x: f64,
    y: f64,
    version: u64,
}

#[derive(Debug, Clone)]
pub struct ProjectionEngine {
    config: ProjectionConfig,
    rebuild_trigger: usize,
    points: BTreeMap<DocumentId, Placement>,
    version: u64,
    layout_epoch: u64,
    edits_since_rebuild: usize,
    /// Canvas units per unit of chord distance between unit vectors
    scale: f64,
    dirty: BTreeSet<DocumentId>,
    /// Positions at the start of the current batch
    batch_origins: HashMap<DocumentId, [f64; 2]>,
}

impl ProjectionEngine {
    pub fn new(config: ProjectionConfig, rebuild_trigger: usize) -> Self {
        let scale = Self::default_scale(&config);
        Self {
            config,
            rebuild_trigger,
            points: BTreeMap::new(),
            version: 0,
            layout_epoch: 0,
            edits_since_rebuild: 0,
            scale,
            dirty: BTreeSet::new(),
            batch_origins: HashMap::new(),
        }
    }

    fn default_scale(config: &ProjectionConfig) -> f64 {
        config.canvas_extent * 0.25
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.points.contains_key(id)
    }

    pub fn position(&self, id: &DocumentId) -> Option<(f64, f64)> {
        self.points.get(id).map(|p| (p.x, p.y))
    }

    /// Current layout version (bumped by every mutating operation)
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn layout_epoch(&self) -> u64 {
        self.layout_epoch
    }

    pub fn edits_since_rebuild(&self) -> usize {
        self.edits_since_rebuild
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Enough incremental drift has accumulated for a full rebuild
    pub fn needs_rebuild(&self) -> bool {
        self.rebuild_trigger > 0 && self.edits_since_rebuild >= self.rebuild_trigger
    }

    /// All points, sorted by document id
    pub fn points(&self) -> Vec<LayoutPoint> {
        self.points
            .iter()
            .map(|(id, p)| LayoutPoint {
                doc_id: id.clone(),
                x: p.x,
                y: p.y,
                version: p.version,
            })
            .collect()
    }

    /// Points changed since the last call, for persistence
    pub fn take_dirty(&mut self) -> Vec<LayoutPoint> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|id| {
                self.points.get(&id).map(|p| LayoutPoint {
                    doc_id: id.clone(),
                    x: p.x,
                    y: p.y,
                    version: p.version,
                })
            })
            .collect()
    }

    /// Start a new stability window; neighbour relaxation is measured from here
    pub fn begin_batch(&mut self) {
        self.batch_origins.clear();
    }

    fn id_hash(&self, id: &DocumentId) -> u64 {
        refine::stable_hash(id.as_str().as_bytes(), self.config.seed)
    }

    fn set_point(&mut self, id: &DocumentId, p: [f64; 2]) {
        self.points.insert(
            id.clone(),
            Placement {
                x: p[0],
                y: p[1],
                version: self.version,
            },
        );
        self.dirty.insert(id.clone());
    }

    /// Place a new document near its nearest already-placed neighbours
    ///
    /// `neighbors` come from the similarity index, best first.
    pub fn insert(&mut self, id: &DocumentId, neighbors: &[ScoredDocument]) -> ProjectionReport {
        self.points.remove(id);
        self.version += 1;
        self.edits_since_rebuild += 1;

        let extent = self.config.canvas_extent;
        let anchors: Vec<(DocumentId, [f64; 2], f32)> = neighbors
            .iter()
            .filter(|n| &n.doc_id != id && n.score.is_finite())
            .filter_map(|n| {
                self.points
                    .get(&n.doc_id)
                    .map(|p| (n.doc_id.clone(), [p.x, p.y], n.score))
            })
            .collect();

        if self.points.is_empty() {
            // First point sits at the canvas centre
            self.set_point(id, [0.0, 0.0]);
            return ProjectionReport {
                degenerate: false,
                moved: 1,
            };
        }

        // Seed at the similarity-weighted centroid of placed neighbours
        let mut seed = [0.0f64; 2];
        let positive: f64 = anchors.iter().map(|a| f64::from(a.2.max(0.0))).sum();
        if positive > COINCIDENT {
            for (_, p, score) in &anchors {
                let w = f64::from(score.max(0.0)) / positive;
                seed[0] += w * p[0];
                seed[1] += w * p[1];
            }
        } else if !anchors.is_empty() {
            let n = anchors.len() as f64;
            seed[0] = anchors.iter().map(|a| a.1[0]).sum::<f64>() / n;
            seed[1] = anchors.iter().map(|a| a.1[1]).sum::<f64>() / n;
        }

        // Deterministic per-id jitter breaks ties with the centroid itself
        let mut rng = ChaCha8Rng::seed_from_u64(self.id_hash(id));
        let angle = rng.random_range(0.0..std::f64::consts::TAU);
        let radius = self.config.min_separation.max(1.0) * rng.random_range(0.5..1.0);
        let mut p = [seed[0] + radius * angle.cos(), seed[1] + radius * angle.sin()];

        let springs: Vec<([f64; 2], f32)> = anchors.iter().map(|a| (a.1, a.2)).collect();
        p = refine::local_refine(
            p,
            &springs,
            self.scale,
            self.config.refine_iterations,
            self.config.learning_rate,
        );
        if !(p[0].is_finite() && p[1].is_finite()) {
            p = [seed[0] + radius * angle.cos(), seed[1] + radius * angle.sin()];
        }
        p = refine::clamp_to_canvas(p, extent);

        let mut moved = 1 + self.relax_neighbors(p, &anchors);
        p = self.separate_new_point(id, p);
        self.set_point(id, p);

        if moved > self.points.len() {
            moved = self.points.len();
        }
        ProjectionReport {
            degenerate: false,
            moved,
        }
    }

    /// Nudge placed neighbours toward their target distance from the new
    /// point, never beyond `stability_epsilon` from their batch origin
    fn relax_neighbors(&mut self, p: [f64; 2], anchors: &[(DocumentId, [f64; 2], f32)]) -> usize {
        let epsilon = self.config.stability_epsilon;
        if epsilon <= 0.0 {
            return 0;
        }
        let extent = self.config.canvas_extent;
        let mut moved = 0;

        for (neighbor, q, score) in anchors {
            if *score <= 0.0 {
                continue;
            }
            let dist = refine::distance(*q, p);
            if dist < COINCIDENT {
                continue;
            }
            let target = self.scale * refine::chord(*score);
            let pull = self.config.learning_rate * f64::from(*score) * (dist - target) / dist;
            let candidate = [q[0] - pull * (q[0] - p[0]), q[1] - pull * (q[1] - p[1])];

            let origin = *self.batch_origins.entry(neighbor.clone()).or_insert(*q);
            let offset = [candidate[0] - origin[0], candidate[1] - origin[1]];
            let reach = (offset[0] * offset[0] + offset[1] * offset[1]).sqrt();
            let mut next = if reach > epsilon {
                [
                    origin[0] + offset[0] * epsilon / reach,
                    origin[1] + offset[1] * epsilon / reach,
                ]
            } else {
                candidate
            };
            next = refine::clamp_to_canvas(next, extent);

            if refine::distance(next, *q) > 0.0 {
                self.set_point(neighbor, next);
                moved += 1;
            }
        }
        moved
    }

    /// Push only the new point out of any overlap
    fn separate_new_point(&self, id: &DocumentId, mut p: [f64; 2]) -> [f64; 2] {
        let min_separation = self.config.min_separation;
        if min_separation <= 0.0 {
            return p;
        }
        let hash = self.id_hash(id);

        for pass in 0..8u64 {
            let mut shift = [0.0f64; 2];
            let mut overlaps = 0;
            for (other, q) in &self.points {
                if other == id {
                    continue;
                }
                let q = [q.x, q.y];
                let dist = refine::distance(p, q);
                if dist >= min_separation {
                    continue;
                }
                overlaps += 1;
                let dir = if dist < COINCIDENT {
                    refine::hashed_direction(hash.wrapping_add(pass))
                } else {
                    [(p[0] - q[0]) / dist, (p[1] - q[1]) / dist]
                };
                shift[0] += dir[0] * (min_separation - dist);
                shift[1] += dir[1] * (min_separation - dist);
            }
            if overlaps == 0 {
                break;
            }
            p = refine::clamp_to_canvas(
                [p[0] + shift[0], p[1] + shift[1]],
                self.config.canvas_extent,
            );
        }
        p
    }

    /// Edit path: remove the stale point, then place it again from its new neighbours
    pub fn reinsert(&mut self, id: &DocumentId, neighbors: &[ScoredDocument]) -> ProjectionReport {
        self.points.remove(id);
        self.dirty.remove(id);
        self.insert(id, neighbors)
    }

    /// Drop a point; no other point moves
    pub fn remove(&mut self, id: &DocumentId) -> bool {
        self.dirty.remove(id);
        self.batch_origins.remove(id);
        if self.points.remove(id).is_some() {
            self.version += 1;
            self.edits_since_rebuild += 1;
            true
        } else {
            false
        }
    }

    /// Adopt persisted points (restart path)
    ///
    /// The distance scale is re-estimated from the restored geometry.
    pub fn restore(&mut self, points: Vec<LayoutPoint>, index: &SimilarityIndex, k: usize) {
        self.points.clear();
        self.dirty.clear();
        self.batch_origins.clear();

        let extent = self.config.canvas_extent;
        for point in points {
            if !(point.x.is_finite() && point.y.is_finite()) {
                continue;
            }
            let p = refine::clamp_to_canvas([point.x, point.y], extent);
            self.version = self.version.max(point.version);
            self.points.insert(
                point.doc_id,
                Placement {
                    x: p[0],
                    y: p[1],
                    version: point.version,
                },
            );
        }

        let mut ratios: Vec<f64> = Vec::new();
        for (id, p) in &self.points {
            for neighbor in index.neighbors(id, k) {
                let Some(q) = self.points.get(&neighbor.doc_id) else {
                    continue;
                };
                let chord = refine::chord(neighbor.score);
                if chord > 1e-3 {
                    ratios.push(refine::distance([p.x, p.y], [q.x, q.y]) / chord);
                }
            }
        }
        ratios.retain(|r| r.is_finite() && *r > 0.0);
        if !ratios.is_empty() {
            ratios.sort_by(|a, b| a.total_cmp(b));
            self.scale = ratios[ratios.len() / 2];
        }

        tracing::debug!(
            "Restored {} layout points (scale {:.3})",
            self.points.len(),
            self.scale
        );
    }

    /// Full global reduction over every indexed document
    ///
    /// Seeded: an unchanged corpus always yields the same layout, and a
    /// previous layout (if any) is aligned onto so the canvas does not flip.
    pub fn rebuild(&mut self, index: &SimilarityIndex, k: usize) -> ProjectionReport {
        let ids: Vec<DocumentId> = index.ids().cloned().collect();
        let vectors: Vec<&[f32]> = index.iter().map(|(_, v)| v).collect();
        let n = ids.len();

        let previous: BTreeMap<DocumentId, [f64; 2]> = self
            .points
            .iter()
            .map(|(id, p)| (id.clone(), [p.x, p.y]))
            .collect();

        self.version += 1;
        self.layout_epoch += 1;
        self.edits_since_rebuild = 0;
        self.batch_origins.clear();
        self.points.clear();
        self.dirty.clear();

        if n == 0 {
            return ProjectionReport::default();
        }
        if n == 1 {
            self.scale = Self::default_scale(&self.config);
            self.set_point(&ids[0], [0.0, 0.0]);
            return ProjectionReport {
                degenerate: false,
                moved: 1,
            };
        }

        let hashes: Vec<u64> = ids.iter().map(|id| self.id_hash(id)).collect();
        let mut degenerate = false;

        let coords = match pca::principal_plane(&vectors, self.config.seed) {
            Some(mut coords) => {
                let positions: HashMap<&DocumentId, usize> =
                    ids.iter().enumerate().map(|(i, id)| (id, i)).collect();
                let links: Vec<Vec<Link>> = ids
                    .iter()
                    .map(|id| {
                        index
                            .neighbors(id, k)
                            .into_iter()
                            .filter_map(|nb| {
                                positions.get(&nb.doc_id).map(|&j| Link {
                                    index: j,
                                    similarity: nb.score,
                                })
                            })
                            .collect()
                    })
                    .collect();

                refine::fit_to_canvas(&mut coords, self.config.canvas_extent);
                let scale = refine::calibrate_scale(&coords, &links)
                    .unwrap_or_else(|| Self::default_scale(&self.config));

                refine::global_refine(
                    &mut coords,
                    &links,
                    |i, j| vectors[i].iter().zip(vectors[j]).map(|(a, b)| a * b).sum(),
                    scale,
                    self.config.rebuild_iterations,
                    self.config.learning_rate,
                    self.config.seed,
                );

                let fit = refine::fit_to_canvas(&mut coords, self.config.canvas_extent);
                self.scale = scale * fit;
                refine::deoverlap(&mut coords, self.config.min_separation, &hashes);
                self.align_to_previous(&ids, &previous, &mut coords);

                if coords.iter().all(|c| c[0].is_finite() && c[1].is_finite()) {
                    coords
                } else {
                    degenerate = true;
                    self.spiral(n)
                }
            }
            None => {
                degenerate = true;
                self.spiral(n)
            }
        };

        if degenerate {
            self.scale = Self::default_scale(&self.config);
            tracing::warn!(
                "ProjectionDegenerate: {} documents placed by deterministic jitter",
                n
            );
        }

        for (id, c) in ids.iter().zip(&coords) {
            self.set_point(id, *c);
        }

        tracing::debug!(
            "Layout rebuilt: {} points, epoch {}, scale {:.3}",
            n,
            self.layout_epoch,
            self.scale
        );

        ProjectionReport { degenerate, moved: n }
    }

    fn align_to_previous(
        &mut self,
        ids: &[DocumentId],
        previous: &BTreeMap<DocumentId, [f64; 2]>,
        coords: &mut [[f64; 2]],
    ) {
        let (source, target): (Vec<[f64; 2]>, Vec<[f64; 2]>) = ids
            .iter()
            .zip(coords.iter())
            .filter_map(|(id, c)| previous.get(id).map(|p| (*c, *p)))
            .unzip();

        if let Some(factor) = refine::procrustes_align(&source, &target, coords) {
            self.scale *= factor;
            let shrink = refine::contain(coords, self.config.canvas_extent);
            self.scale *= shrink;
        }
    }

    /// Golden-angle spiral ordered by id, used when no reduction is meaningful
    fn spiral(&self, n: usize) -> Vec<[f64; 2]> {
        let extent = self.config.canvas_extent;
        let mut spacing = self.config.min_separation.max(1.0) * 1.5;
        let outer = spacing * ((n.saturating_sub(1)) as f64).sqrt();
        if outer > extent * 0.9 {
            spacing *= extent * 0.9 / outer;
        }
        (0..n)
            .map(|i| {
                let r = spacing * (i as f64).sqrt();
                let theta = i as f64 * GOLDEN_ANGLE;
                [r * theta.cos(), r * theta.sin()]
            })
            .collect()
    }
}
