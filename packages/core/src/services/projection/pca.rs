//! Seeded two-component PCA by power iteration with deflation
//!
//! Never materialises the D×D covariance matrix: each iteration computes
//! `Xᵀ(X·v)` over the centred data directly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const MAX_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-10;

/// Below this total variance the corpus is treated as degenerate
pub(crate) const VARIANCE_TOLERANCE: f64 = 1e-10;

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Remove the component of `v` along the unit vector `axis`
fn orthogonalize(v: &mut [f64], axis: &[f64]) {
    let projection = dot(v, axis);
    for (x, a) in v.iter_mut().zip(axis) {
        *x -= projection * a;
    }
}

/// Dominant eigenvector of XᵀX orthogonal to `exclude`; zero when the
/// remaining variance is nil
fn power_iteration(centered: &[Vec<f64>], exclude: Option<&[f64]>, rng: &mut ChaCha8Rng) -> Vec<f64> {
    let dim = centered[0].len();
    let mut v: Vec<f64> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    if let Some(axis) = exclude {
        orthogonalize(&mut v, axis);
    }
    let n0 = norm(&v);
    if n0 == 0.0 {
        return vec![0.0; dim];
    }
    v.iter_mut().for_each(|x| *x /= n0);

    for _ in 0..MAX_ITERATIONS {
        let scores: Vec<f64> = centered.iter().map(|row| dot(row, &v)).collect();
        let mut next = vec![0.0; dim];
        for (row, s) in centered.iter().zip(&scores) {
            for (acc, x) in next.iter_mut().zip(row) {
                *acc += s * x;
            }
        }
        if let Some(axis) = exclude {
            orthogonalize(&mut next, axis);
        }

        let magnitude = norm(&next);
        if magnitude < 1e-15 {
            return vec![0.0; dim];
        }
        next.iter_mut().for_each(|x| *x /= magnitude);

        let delta: f64 = next
            .iter()
            .zip(&v)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        v = next;
        if delta < CONVERGENCE {
            break;
        }
    }
    v
}

/// Make the largest-magnitude coordinate of a component positive, so the
/// arbitrary sign of an eigenvector never flips the layout
fn fix_sign(coords: &mut [[f64; 2]], component: usize) {
    let mut best = 0.0f64;
    let mut sign = 1.0;
    for c in coords.iter() {
        if c[component].abs() > best + 1e-12 {
            best = c[component].abs();
            sign = c[component].signum();
        }
    }
    if sign < 0.0 {
        for c in coords.iter_mut() {
            c[component] = -c[component];
        }
    }
}

/// Project vectors onto their top two principal axes
///
/// Returns `None` when the corpus is degenerate (fewer than two vectors,
/// mismatched dimensions, or total variance below tolerance).
pub(crate) fn principal_plane(vectors: &[&[f32]], seed: u64) -> Option<Vec<[f64; 2]>> {
    let n = vectors.len();
    if n < 2 {
        return None;
    }
    let dim = vectors[0].len();
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut mean = vec![0.0f64; dim];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += f64::from(*x);
        }
    }
    mean.iter_mut().for_each(|m| *m /= n as f64);

    let centered: Vec<Vec<f64>> = vectors
        .iter()
        .map(|v| v.iter().zip(&mean).map(|(x, m)| f64::from(*x) - m).collect())
        .collect();

    let total_variance: f64 = centered.iter().map(|row| dot(row, row)).sum::<f64>() / n as f64;
    if !total_variance.is_finite() || total_variance < VARIANCE_TOLERANCE {
        return None;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let first = power_iteration(&centered, None, &mut rng);
    if norm(&first) == 0.0 {
        return None;
    }
    let second = power_iteration(&centered, Some(&first), &mut rng);

    let mut coords: Vec<[f64; 2]> = centered
        .iter()
        .map(|row| [dot(row, &first), dot(row, &second)])
        .collect();

    if coords.iter().any(|c| !c[0].is_finite() || !c[1].is_finite()) {
        return None;
    }

    fix_sign(&mut coords, 0);
    fix_sign(&mut coords, 1);
    Some(coords)
}
