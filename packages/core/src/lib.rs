//! NoteSphere Core: the semantic positioning pipeline
//!
//! Turns document content into vectors, keeps those vectors in a durable
//! store, and maintains a stable 2D layout plus similarity edges that
//! rendering consumers read as versioned snapshots.
//!
//! # Architecture
//!
//! - **Embedding**: any [`notesphere_nlp_engine::TextEncoder`], run off the async runtime
//! - **Vector Store**: libsql (embedded SQLite-compatible) or in-memory
//! - **Single writer**: index and projection state are owned by one task
//! - **Snapshots**: published through a `tokio::sync::watch` channel
//!
//! # Modules
//!
//! - [`models`] - Documents, embedding records, layout points and snapshots
//! - [`db`] - Vector store trait and implementations
//! - [`services`] - Similarity index, projection engine, coordinator
//! - [`config`] - Pipeline configuration (TOML)

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{PipelineConfig, ProjectionConfig, SearchStrategy};
pub use db::{LibsqlVectorStore, MemoryVectorStore, StoreError, VectorStore};
pub use models::*;
pub use services::*;
