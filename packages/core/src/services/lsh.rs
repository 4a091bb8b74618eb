//! Random-hyperplane LSH for approximate cosine neighbours
//!
//! Each table hashes a vector to the sign pattern of its dot products with
//! `bits` seeded random hyperplanes. Lookups probe the exact bucket plus every
//! bucket one bit away, then the caller rescores candidates exactly.

use crate::models::DocumentId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub(crate) struct LshForest {
    seed: u64,
    tables: usize,
    bits: usize,
    /// `tables * bits` hyperplanes, created once the dimension is known
    planes: Vec<Vec<f32>>,
    buckets: Vec<HashMap<u64, BTreeSet<DocumentId>>>,
    keys: HashMap<DocumentId, Vec<u64>>,
}

impl LshForest {
    pub(crate) fn new(seed: u64, tables: usize, bits: usize) -> Self {
        Self {
            seed,
            tables: tables.max(1),
            bits: bits.clamp(1, 64),
            planes: Vec::new(),
            buckets: Vec::new(),
            keys: HashMap::new(),
        }
    }

    fn ensure_planes(&mut self, dimension: usize) {
        if !self.planes.is_empty() && self.planes[0].len() == dimension {
            return;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.planes = (0..self.tables * self.bits)
            .map(|_| {
                (0..dimension)
                    .map(|_| rng.random_range(-1.0f32..1.0))
                    .collect()
            })
            .collect();
        self.buckets = vec![HashMap::new(); self.tables];
        self.keys.clear();
    }

    fn key(&self, table: usize, vector: &[f32]) -> u64 {
        let mut key = 0u64;
        for bit in 0..self.bits {
            let plane = &self.planes[table * self.bits + bit];
            let dot: f32 = plane.iter().zip(vector).map(|(p, v)| p * v).sum();
            if dot >= 0.0 {
                key |= 1 << bit;
            }
        }
        key
    }

    pub(crate) fn insert(&mut self, id: &DocumentId, vector: &[f32]) {
        self.remove(id);
        self.ensure_planes(vector.len());

        let keys: Vec<u64> = (0..self.tables).map(|t| self.key(t, vector)).collect();
        for (table, key) in keys.iter().enumerate() {
            self.buckets[table]
                .entry(*key)
                .or_default()
                .insert(id.clone());
        }
        self.keys.insert(id.clone(), keys);
    }

    pub(crate) fn remove(&mut self, id: &DocumentId) {
        if let Some(keys) = self.keys.remove(id) {
            for (table, key) in keys.into_iter().enumerate() {
                if let Some(bucket) = self.buckets[table].get_mut(&key) {
                    bucket.remove(id);
                    if bucket.is_empty() {
                        self.buckets[table].remove(&key);
                    }
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        for table in &mut self.buckets {
            table.clear();
        }
        self.keys.clear();
    }

    /// Ids sharing a bucket (or a one-bit-away bucket) with `vector` in any table
    pub(crate) fn candidates(&self, vector: &[f32]) -> BTreeSet<DocumentId> {
        let mut found = BTreeSet::new();
        if self.planes.is_empty() || self.planes[0].len() != vector.len() {
            return found;
        }

        for table in 0..self.tables {
            let key = self.key(table, vector);
            let probes = std::iter::once(key).chain((0..self.bits).map(|bit| key ^ (1 << bit)));
            for probe in probes {
                if let Some(bucket) = self.buckets[table].get(&probe) {
                    found.extend(bucket.iter().cloned());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors_always_collide() {
        let mut forest = LshForest::new(7, 4, 8);
        let v = vec![0.3, -0.2, 0.9, 0.1];
        forest.insert(&"a".into(), &v);
        forest.insert(&"b".into(), &v);

        let found = forest.candidates(&v);
        assert!(found.contains(&DocumentId::from("a")));
        assert!(found.contains(&DocumentId::from("b")));
    }

    #[test]
    fn test_remove_clears_buckets() {
        let mut forest = LshForest::new(7, 4, 8);
        let v = vec![1.0, 0.0, 0.0];
        forest.insert(&"a".into(), &v);
        forest.remove(&"a".into());
        assert!(forest.candidates(&v).is_empty());
        assert!(forest.buckets.iter().all(|t| t.is_empty()));
    }

    #[test]
    fn test_seeded_planes_are_reproducible() {
        let mut first = LshForest::new(11, 2, 16);
        let mut second = LshForest::new(11, 2, 16);
        let v = vec![0.5, 0.5, -0.5, 0.1, 0.2];
        first.insert(&"a".into(), &v);
        second.insert(&"a".into(), &v);
        assert_eq!(first.keys, second.keys);
    }
}
