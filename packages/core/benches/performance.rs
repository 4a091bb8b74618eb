//! Performance benchmarks for the NoteSphere positioning pipeline
//!
//! Run with: `cargo bench -p notesphere-core`
//!
//! These benchmarks measure critical path performance:
//! - Incremental index + projection update (the per-edit hot path)
//! - Full rebuild of index and layout
//! - End-to-end `document_changed` through the coordinator

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use notesphere_core::{
    ContentHash, DocumentId, LayoutCoordinator, MemoryVectorStore, PipelineConfig,
    ProjectionConfig, ProjectionEngine, SimilarityIndex,
};
use notesphere_nlp_engine::{HashingEncoder, TextEncoder};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tokio::runtime::Runtime;

const DIMENSION: usize = 384;

/// Clustered synthetic unit vectors: `n` points around 12 random centres
fn synthetic_corpus(n: usize, seed: u64) -> Vec<(DocumentId, Vec<f32>)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let centres: Vec<Vec<f32>> = (0..12)
        .map(|_| (0..DIMENSION).map(|_| rng.random_range(-1.0f32..1.0)).collect())
        .collect();

    (0..n)
        .map(|i| {
            let centre = &centres[i % centres.len()];
            let vector = centre
                .iter()
                .map(|c| c + rng.random_range(-0.3f32..0.3))
                .collect();
            (DocumentId::new(format!("doc-{:06}", i)), vector)
        })
        .collect()
}

fn prepared(n: usize) -> (SimilarityIndex, ProjectionEngine, Vec<(DocumentId, Vec<f32>)>) {
    let config = PipelineConfig::default();
    let corpus = synthetic_corpus(n + 32, 7);
    let (base, extra) = corpus.split_at(n);

    let mut index = SimilarityIndex::from_config(&config);
    index.rebuild(base.iter().cloned());
    let mut engine = ProjectionEngine::new(ProjectionConfig::default(), 0);
    engine.rebuild(&index, config.neighbor_count);
    (index, engine, extra.to_vec())
}

/// Benchmark the incremental update applied by the writer for one edit
///
/// Target: well under the 200ms end-to-end budget at 5k documents
fn bench_incremental_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_insert");
    group.sample_size(20);

    for n in [500usize, 2_000, 5_000] {
        let (index, engine, extra) = prepared(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter_batched(
                || (index.clone(), engine.clone()),
                |(mut index, mut engine)| {
                    let (id, vector) = &extra[0];
                    engine.begin_batch();
                    index.upsert(id.clone(), vector);
                    let neighbors = index.neighbors(id, 8);
                    black_box(engine.insert(id, &neighbors));
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmark a full index + layout rebuild
fn bench_full_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_rebuild");
    group.sample_size(10); // Fewer samples for expensive operations

    for n in [200usize, 1_000] {
        let corpus = synthetic_corpus(n, 11);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut index = SimilarityIndex::new(0.7);
                index.rebuild(corpus.iter().cloned());
                let mut engine = ProjectionEngine::new(ProjectionConfig::default(), 0);
                black_box(engine.rebuild(&index, 8))
            });
        });
    }

    group.finish();
}

/// Benchmark one edit end to end through the coordinator
fn bench_document_changed(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let encoder: Arc<dyn TextEncoder> = Arc::new(HashingEncoder::new(DIMENSION));

    let handle = rt.block_on(async {
        let store = Arc::new(MemoryVectorStore::new());
        let handle = LayoutCoordinator::start(PipelineConfig::default(), encoder, store)
            .await
            .unwrap();
        for i in 0..500 {
            let text = format!("seed note {} about topic {}", i, i % 17);
            handle
                .document_changed(DocumentId::new(format!("seed-{}", i)), text.clone(), ContentHash::of(&text))
                .await
                .unwrap();
        }
        handle
    });

    let mut counter = 0u64;
    c.bench_function("document_changed_500_docs", |b| {
        b.iter(|| {
            counter += 1;
            let text = format!("edited note revision {} about topic {}", counter, counter % 17);
            rt.block_on(async {
                black_box(
                    handle
                        .document_changed(DocumentId::from("hot"), text.clone(), ContentHash::of(&text))
                        .await
                        .unwrap(),
                )
            })
        });
    });
}

criterion_group!(
    benches,
    bench_incremental_insert,
    bench_full_rebuild,
    bench_document_changed
);
criterion_main!(benches);
