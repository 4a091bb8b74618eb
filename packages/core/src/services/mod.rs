//! Pipeline Services
//!
//! The in-memory halves of the pipeline and the task that drives them:
//!
//! - `SimilarityIndex` - cosine neighbours and thresholded edges
//! - `ProjectionEngine` - persistent, stable 2D layout state
//! - `LayoutCoordinator` - change orchestration and snapshot publishing
//! - `PipelineMetrics` - counters and latency percentiles
//!
//! Only the coordinator's writer task mutates index and projection state.

pub mod coordinator;
pub mod error;
mod lsh;
pub mod metrics;
pub mod projection;
pub mod similarity_index;

pub use coordinator::{
    ChangeOutcome, CoordinatorHandle, LayoutCoordinator, PipelineStage, ReconcileReport,
};
pub use error::PipelineError;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use projection::{ProjectionEngine, ProjectionReport};
pub use similarity_index::{cosine_similarity, SimilarityIndex};
