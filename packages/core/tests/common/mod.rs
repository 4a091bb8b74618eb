//! Shared fixtures for coordinator integration tests
//!
//! `TopicEncoder` stands in for the real model: three named topic axes plus
//! low-weight hashed axes for every other word, so the similarity between any
//! two test sentences is known in advance.

#![allow(dead_code)]

use notesphere_core::{
    ChangeOutcome, ContentHash, CoordinatorHandle, DocumentId, LayoutCoordinator,
    MemoryVectorStore, PipelineConfig, PipelineError, VectorStore,
};
use notesphere_nlp_engine::{l2_normalize, validate_text, EmbeddingError, TextEncoder};
use std::sync::Arc;

pub const TOPIC_DIMENSION: usize = 16;

const OUTDOORS: &[&str] = &[
    "hiking", "hike", "mountain", "mountains", "trail", "trails", "weekend", "activity",
    "trip", "camping", "outdoors", "climbing", "summit",
];
const FINANCE: &[&str] = &[
    "tax", "taxes", "filing", "quarterly", "deadline", "deadlines", "invoice", "budget",
    "accounting", "revenue",
];
const BAKING: &[&str] = &[
    "recipe", "sourdough", "bread", "bake", "baking", "flour", "oven", "dough", "starter",
];
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "for", "i", "in", "is", "my", "of", "on", "the", "to",
];

/// Weight of a word outside the topic lexicon
const BACKGROUND_WEIGHT: f32 = 0.15;

#[derive(Debug, Default)]
pub struct TopicEncoder;

impl TopicEncoder {
    fn fnv(word: &str) -> u64 {
        word.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
            (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        })
    }

    fn background_axis(word: &str) -> usize {
        3 + (Self::fnv(word) % (TOPIC_DIMENSION as u64 - 3)) as usize
    }
}

impl TextEncoder for TopicEncoder {
    fn name(&self) -> &str {
        "topic-lexicon"
    }

    fn dimension(&self) -> usize {
        TOPIC_DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        validate_text(text)?;

        let mut vector = vec![0.0f32; TOPIC_DIMENSION];
        let lowered = text.to_lowercase();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        {
            if OUTDOORS.contains(&word) {
                vector[0] += 1.0;
            } else if FINANCE.contains(&word) {
                vector[1] += 1.0;
            } else if BAKING.contains(&word) {
                vector[2] += 1.0;
            } else {
                vector[Self::background_axis(word)] += BACKGROUND_WEIGHT;
            }
        }

        if vector.iter().all(|v| *v == 0.0) {
            vector[Self::background_axis(lowered.trim())] = 1.0;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        embedding: notesphere_nlp_engine::EmbeddingConfig {
            dimension: TOPIC_DIMENSION,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn start_with(
    config: PipelineConfig,
    store: Arc<dyn VectorStore>,
) -> Result<CoordinatorHandle, PipelineError> {
    LayoutCoordinator::start(config, Arc::new(TopicEncoder), store).await
}

pub async fn start_memory(
    config: PipelineConfig,
) -> Result<(CoordinatorHandle, Arc<MemoryVectorStore>), PipelineError> {
    let store = Arc::new(MemoryVectorStore::new());
    let handle = start_with(config, store.clone()).await?;
    Ok((handle, store))
}

/// Submit `content` as the new content of `id`
pub async fn change(
    handle: &CoordinatorHandle,
    id: &str,
    content: &str,
) -> Result<ChangeOutcome, PipelineError> {
    handle
        .document_changed(DocumentId::from(id), content.to_string(), ContentHash::of(content))
        .await
}

pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
