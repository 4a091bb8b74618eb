//! Vector Store Layer
//!
//! Durable mapping from document identity to its latest embedding, content
//! hash and generation timestamp, plus the persisted layout points.
//!
//! - [`VectorStore`] - async trait the coordinator depends on
//! - [`LibsqlVectorStore`] - embedded libsql database (production)
//! - [`MemoryVectorStore`] - in-process maps (tests, ephemeral use)

mod error;
mod libsql_store;
mod memory_store;
mod vector_store;

pub use error::StoreError;
pub use libsql_store::LibsqlVectorStore;
pub use memory_store::MemoryVectorStore;
pub use vector_store::{UpsertOutcome, VectorStore};
