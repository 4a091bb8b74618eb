//! Data Models
//!
//! This module contains the core data structures of the positioning pipeline:
//!
//! - `Document` / `DocumentId` / `ContentHash` - what the storage layer hands us
//! - `EmbeddingRecord` - latest vector per document
//! - `LayoutPoint`, `SimilarityEdge`, `LayoutSnapshot` - what rendering consumes

mod document;
mod embedding;
mod layout;

pub use document::{ContentHash, Document, DocumentId};
pub use embedding::EmbeddingRecord;
pub use layout::{LayoutPoint, LayoutSnapshot, ScoredDocument, SimilarityEdge};
