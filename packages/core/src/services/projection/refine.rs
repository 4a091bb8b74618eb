//! Layout refinement primitives
//!
//! Target 2D distance between two documents is `scale · chord(similarity)`,
//! where `chord(s) = sqrt(2 - 2s)` is the Euclidean distance between unit
//! vectors with cosine similarity `s`.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// Coincident points closer than this have no usable direction
pub(crate) const COINCIDENT: f64 = 1e-9;

/// Repulsion samples per point per global iteration
const REPULSION_SAMPLES: usize = 3;

/// De-overlap passes before giving up
const DEOVERLAP_PASSES: usize = 12;

/// A neighbour reference inside a rebuild: position index plus similarity
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub(crate) index: usize,
    pub(crate) similarity: f32,
}

pub(crate) fn chord(similarity: f32) -> f64 {
    (2.0 - 2.0 * f64::from(similarity.clamp(-1.0, 1.0))).max(0.0).sqrt()
}

/// Attraction weight of a neighbour; dissimilar neighbours still keep distance
pub(crate) fn link_weight(similarity: f32) -> f64 {
    0.1 + f64::from(similarity.max(0.0))
}

/// FNV-1a, stable across platforms and releases
pub(crate) fn stable_hash(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Deterministic unit direction derived from a hash
pub(crate) fn hashed_direction(hash: u64) -> [f64; 2] {
    let angle = (hash % 1_000_003) as f64 / 1_000_003.0 * std::f64::consts::TAU;
    [angle.cos(), angle.sin()]
}

/// Ratio between 2D distance and high-dimensional chord distance over the kNN graph
pub(crate) fn calibrate_scale(coords: &[[f64; 2]], links: &[Vec<Link>]) -> Option<f64> {
    let mut planar = 0.0;
    let mut spatial = 0.0;
    for (i, row) in links.iter().enumerate() {
        for link in row {
            let c = chord(link.similarity);
            if c < COINCIDENT {
                continue;
            }
            planar += distance(coords[i], coords[link.index]);
            spatial += c;
        }
    }
    if spatial < COINCIDENT || planar < COINCIDENT || !planar.is_finite() {
        None
    } else {
        Some(planar / spatial)
    }
}

pub(crate) fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Gradient of `½·w·(|p−q| − target)²` with respect to `p`
fn spring(p: [f64; 2], q: [f64; 2], target: f64, weight: f64) -> Option<[f64; 2]> {
    let dx = p[0] - q[0];
    let dy = p[1] - q[1];
    let dist = (dx * dx + dy * dy).sqrt();
    if dist < COINCIDENT {
        return None;
    }
    let factor = weight * (dist - target) / dist;
    Some([factor * dx, factor * dy])
}

/// Bounded seeded kNN-attraction / sampled-repulsion refinement of every point
///
/// `similarity(i, j)` scores arbitrary pairs for the repulsion samples.
pub(crate) fn global_refine<F>(
    coords: &mut [[f64; 2]],
    links: &[Vec<Link>],
    similarity: F,
    scale: f64,
    iterations: usize,
    learning_rate: f64,
    seed: u64,
) where
    F: Fn(usize, usize) -> f32,
{
    let n = coords.len();
    if n < 2 || iterations == 0 {
        return;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x9e37_79b9_7f4a_7c15);

    for t in 0..iterations {
        let rate = learning_rate * (1.0 - t as f64 / iterations as f64);
        let mut steps = vec![[0.0f64; 2]; n];

        for i in 0..n {
            let mut grad = [0.0f64; 2];
            let mut total = 0.0;

            for link in &links[i] {
                let weight = link_weight(link.similarity);
                let target = scale * chord(link.similarity);
                if let Some(g) = spring(coords[i], coords[link.index], target, weight) {
                    grad[0] += g[0];
                    grad[1] += g[1];
                    total += weight;
                }
            }

            for _ in 0..REPULSION_SAMPLES {
                let j = rng.random_range(0..n);
                if j == i {
                    continue;
                }
                let target = scale * chord(similarity(i, j));
                // Repulsion only: push apart points that sit too close
                if distance(coords[i], coords[j]) >= target {
                    continue;
                }
                if let Some(g) = spring(coords[i], coords[j], target, 0.5) {
                    grad[0] += g[0];
                    grad[1] += g[1];
                    total += 0.5;
                }
            }

            if total > 0.0 {
                let mut step = [rate * grad[0] / total, rate * grad[1] / total];
                let length = (step[0] * step[0] + step[1] * step[1]).sqrt();
                if length > scale {
                    step = [step[0] * scale / length, step[1] * scale / length];
                }
                steps[i] = step;
            }
        }

        for (c, s) in coords.iter_mut().zip(&steps) {
            c[0] -= s[0];
            c[1] -= s[1];
        }
    }
}

/// Move one free point toward its target distances from fixed anchors
pub(crate) fn local_refine(
    point: [f64; 2],
    anchors: &[([f64; 2], f32)],
    scale: f64,
    iterations: usize,
    learning_rate: f64,
) -> [f64; 2] {
    let mut p = point;
    for _ in 0..iterations {
        let mut grad = [0.0f64; 2];
        let mut total = 0.0;
        for (q, similarity) in anchors {
            let weight = link_weight(*similarity);
            if let Some(g) = spring(p, *q, scale * chord(*similarity), weight) {
                grad[0] += g[0];
                grad[1] += g[1];
                total += weight;
            }
        }
        if total == 0.0 {
            break;
        }
        p[0] -= learning_rate * grad[0] / total;
        p[1] -= learning_rate * grad[1] / total;
    }
    p
}

/// Translate to the origin and scale so the layout fills the canvas
///
/// Returns the scale factor applied.
pub(crate) fn fit_to_canvas(coords: &mut [[f64; 2]], extent: f64) -> f64 {
    if coords.is_empty() {
        return 1.0;
    }
    let n = coords.len() as f64;
    let cx = coords.iter().map(|c| c[0]).sum::<f64>() / n;
    let cy = coords.iter().map(|c| c[1]).sum::<f64>() / n;
    for c in coords.iter_mut() {
        c[0] -= cx;
        c[1] -= cy;
    }

    let reach = coords
        .iter()
        .map(|c| c[0].abs().max(c[1].abs()))
        .fold(0.0f64, f64::max);
    if reach < COINCIDENT {
        return 1.0;
    }

    let factor = 0.9 * extent / reach;
    for c in coords.iter_mut() {
        c[0] *= factor;
        c[1] *= factor;
    }
    factor
}

/// Shrink toward the origin if any point left the canvas; returns the factor
pub(crate) fn contain(coords: &mut [[f64; 2]], extent: f64) -> f64 {
    let reach = coords
        .iter()
        .map(|c| c[0].abs().max(c[1].abs()))
        .fold(0.0f64, f64::max);
    if reach <= extent {
        return 1.0;
    }
    let factor = extent / reach;
    for c in coords.iter_mut() {
        c[0] *= factor;
        c[1] *= factor;
    }
    factor
}

pub(crate) fn clamp_to_canvas(p: [f64; 2], extent: f64) -> [f64; 2] {
    [p[0].clamp(-extent, extent), p[1].clamp(-extent, extent)]
}

/// Separate points closer than `min_separation`, grid-accelerated
///
/// Each pass moves a pair apart by half its deficit each; displacement per
/// pass is bounded by `min_separation / 2` per overlapping neighbour.
pub(crate) fn deoverlap(coords: &mut [[f64; 2]], min_separation: f64, hashes: &[u64]) {
    if min_separation <= 0.0 || coords.len() < 2 {
        return;
    }

    let cell_of = |c: [f64; 2]| -> (i64, i64) {
        (
            (c[0] / min_separation).floor() as i64,
            (c[1] / min_separation).floor() as i64,
        )
    };

    for _ in 0..DEOVERLAP_PASSES {
        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, c) in coords.iter().enumerate() {
            grid.entry(cell_of(*c)).or_default().push(i);
        }

        let mut shifts = vec![[0.0f64; 2]; coords.len()];
        let mut overlaps = 0usize;

        for i in 0..coords.len() {
            let (cx, cy) = cell_of(coords[i]);
            for gx in cx - 1..=cx + 1 {
                for gy in cy - 1..=cy + 1 {
                    let Some(members) = grid.get(&(gx, gy)) else {
                        continue;
                    };
                    for &j in members {
                        if j <= i {
                            continue;
                        }
                        let dist = distance(coords[i], coords[j]);
                        if dist >= min_separation {
                            continue;
                        }
                        overlaps += 1;
                        let dir = if dist < COINCIDENT {
                            hashed_direction(hashes[i] ^ hashes[j].rotate_left(17))
                        } else {
                            [
                                (coords[i][0] - coords[j][0]) / dist,
                                (coords[i][1] - coords[j][1]) / dist,
                            ]
                        };
                        let push = (min_separation - dist) / 2.0;
                        shifts[i][0] += dir[0] * push;
                        shifts[i][1] += dir[1] * push;
                        shifts[j][0] -= dir[0] * push;
                        shifts[j][1] -= dir[1] * push;
                    }
                }
            }
        }

        if overlaps == 0 {
            return;
        }
        for (c, s) in coords.iter_mut().zip(&shifts) {
            c[0] += s[0];
            c[1] += s[1];
        }
    }
}

/// Best similarity transform (rotation or reflection, uniform scale,
/// translation) mapping `source` onto `target`, applied to `all`
///
/// Returns the scale factor, or `None` when the fit is undefined.
pub(crate) fn procrustes_align(
    source: &[[f64; 2]],
    target: &[[f64; 2]],
    all: &mut [[f64; 2]],
) -> Option<f64> {
    if source.len() < 2 || source.len() != target.len() {
        return None;
    }
    let n = source.len() as f64;
    let sc = [
        source.iter().map(|p| p[0]).sum::<f64>() / n,
        source.iter().map(|p| p[1]).sum::<f64>() / n,
    ];
    let tc = [
        target.iter().map(|p| p[0]).sum::<f64>() / n,
        target.iter().map(|p| p[1]).sum::<f64>() / n,
    ];

    let (mut sxx, mut sxy, mut syx, mut syy, mut norm) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (s, t) in source.iter().zip(target) {
        let a = [s[0] - sc[0], s[1] - sc[1]];
        let b = [t[0] - tc[0], t[1] - tc[1]];
        sxx += a[0] * b[0];
        sxy += a[0] * b[1];
        syx += a[1] * b[0];
        syy += a[1] * b[1];
        norm += a[0] * a[0] + a[1] * a[1];
    }
    if norm < COINCIDENT {
        return None;
    }

    let rotation_fit = (sxx + syy).hypot(sxy - syx);
    let reflection_fit = (sxx - syy).hypot(sxy + syx);
    let reflect = reflection_fit > rotation_fit + 1e-9;

    let (theta, fit) = if reflect {
        ((sxy + syx).atan2(sxx - syy), reflection_fit)
    } else {
        ((sxy - syx).atan2(sxx + syy), rotation_fit)
    };
    let scale = fit / norm;
    if !scale.is_finite() || scale < COINCIDENT {
        return None;
    }
    let (sin, cos) = theta.sin_cos();

    for p in all.iter_mut() {
        let x = p[0] - sc[0];
        let y = if reflect { -(p[1] - sc[1]) } else { p[1] - sc[1] };
        p[0] = scale * (cos * x - sin * y) + tc[0];
        p[1] = scale * (sin * x + cos * y) + tc[1];
    }
    Some(scale)
}
