//! Pipeline Configuration
//!
//! All tunables of the positioning pipeline. The similarity threshold and the
//! rebuild cadence are policy defaults, not hard requirements; both are meant
//! to be overridden from a TOML file or the CLI.
//!
//! ```toml
//! similarity_threshold = 0.65
//! rebuild_trigger_edit_count = 100
//! search_strategy = "approximate"
//!
//! [projection]
//! seed = 7
//! canvas_extent = 500.0
//! ```

use crate::services::error::PipelineError;
use notesphere_nlp_engine::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Nearest-neighbour search strategy for neighbour and query lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Score every document (reference behaviour, test oracle)
    #[default]
    Exhaustive,
    /// Random-hyperplane LSH candidates, rescored exactly
    Approximate,
}

/// Projection Engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Seed for every random choice the projection makes
    pub seed: u64,

    /// Canvas is the square `[-canvas_extent, canvas_extent]²`
    pub canvas_extent: f64,

    /// Local refinement steps for an inserted point
    pub refine_iterations: usize,

    /// Global refinement steps during a full rebuild
    pub rebuild_iterations: usize,

    /// Maximum displacement of any other point per incremental batch
    pub stability_epsilon: f64,

    /// De-overlap distance between two points
    pub min_separation: f64,

    /// Step size of the refinement loops
    pub learning_rate: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            canvas_extent: 1000.0,
            refine_iterations: 30,
            rebuild_iterations: 200,
            stability_epsilon: 2.0,
            min_separation: 8.0,
            learning_rate: 0.1,
        }
    }
}

impl ProjectionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.canvas_extent.is_finite() && self.canvas_extent > 0.0) {
            return Err("canvas_extent must be a positive number".to_string());
        }
        if !(self.stability_epsilon.is_finite() && self.stability_epsilon >= 0.0) {
            return Err("stability_epsilon must be >= 0".to_string());
        }
        if !(self.min_separation.is_finite() && self.min_separation >= 0.0) {
            return Err("min_separation must be >= 0".to_string());
        }
        if self.min_separation * 4.0 > self.canvas_extent {
            return Err("min_separation is too large for the canvas".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err("learning_rate must be in (0, 1]".to_string());
        }
        Ok(())
    }
}

/// Configuration of the whole positioning pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum cosine similarity for a connection edge
    pub similarity_threshold: f32,

    /// End-to-end latency budget for an incremental update
    pub max_latency_ms: u64,

    /// Incremental edits before an automatic full rebuild (0 disables)
    pub rebuild_trigger_edit_count: usize,

    /// `k` for neighbour-seeded placement and refinement
    pub neighbor_count: usize,

    /// Quiet period before a change is embedded; later changes supersede it
    pub debounce_ms: u64,

    pub search_strategy: SearchStrategy,

    /// LSH hash tables (approximate strategy only)
    pub lsh_tables: usize,

    /// Hyperplanes per LSH table (approximate strategy only)
    pub lsh_bits: usize,

    /// Maximum writer commands folded into one published snapshot
    pub max_batch: usize,

    pub projection: ProjectionConfig,

    pub embedding: EmbeddingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_latency_ms: 200,
            rebuild_trigger_edit_count: 50,
            neighbor_count: 8,
            debounce_ms: 0,
            search_strategy: SearchStrategy::Exhaustive,
            lsh_tables: 8,
            lsh_bits: 12,
            max_batch: 64,
            projection: ProjectionConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err("similarity_threshold must be within [-1, 1]".to_string());
        }
        if self.max_latency_ms == 0 {
            return Err("max_latency_ms must be greater than 0".to_string());
        }
        if self.neighbor_count == 0 {
            return Err("neighbor_count must be greater than 0".to_string());
        }
        if self.lsh_tables == 0 {
            return Err("lsh_tables must be greater than 0".to_string());
        }
        if self.lsh_bits == 0 || self.lsh_bits > 64 {
            return Err("lsh_bits must be within 1..=64".to_string());
        }
        if self.max_batch == 0 {
            return Err("max_batch must be greater than 0".to_string());
        }
        self.projection.validate()?;
        self.embedding.validate()
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = toml::from_str(raw)
            .map_err(|e| PipelineError::config(format!("Failed to parse config: {}", e)))?;
        config.validate().map_err(PipelineError::config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Latency budget as a `Duration`
    pub fn latency_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_latency_ms)
    }
}
