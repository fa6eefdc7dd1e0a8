//! kgraph Graph - Graph store abstraction
//!
//! Provides the [`GraphStore`] backend trait (in-process and SurrealDB
//! implementations) and the [`KnowledgeGraphStore`] adapter that turns
//! extracted triplets into deduplicated, referentially consistent writes.

use async_trait::async_trait;
use kgraph_core::{GraphBatch, GraphSnapshot, Result};

/// Trait for graph database backends.
///
/// Backends merge nodes by key and edges by `(from, to, label)`, and apply
/// a batch atomically: either every write in it lands or none does.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Delete all nodes and edges in the namespace
    async fn clear(&self) -> Result<()>;

    /// Apply a batch of node and edge writes atomically
    async fn apply(&self, batch: &GraphBatch) -> Result<()>;

    /// Replace the whole graph with `batch` in one atomic step. On failure
    /// the previous graph is left in place.
    async fn replace(&self, batch: &GraphBatch) -> Result<()>;

    /// Count stored nodes
    async fn count_nodes(&self) -> Result<usize>;

    /// Count stored edges
    async fn count_edges(&self) -> Result<usize>;

    /// Return every node and edge
    async fn export(&self) -> Result<GraphSnapshot>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

pub mod adapter;
pub mod export;
pub mod memory_store;
pub mod surrealdb_store;

pub use adapter::{KnowledgeGraphStore, UpsertReport, SNAPSHOT_FILE};
pub use memory_store::MemoryGraphStore;
pub use surrealdb_store::SurrealDbStore;

use kgraph_core::{GraphBackend, GraphConfig};
use std::sync::Arc;

/// Connect the backend selected in config
pub async fn connect(config: &GraphConfig) -> Result<Arc<dyn GraphStore>> {
    match config.backend {
        GraphBackend::Memory => Ok(Arc::new(MemoryGraphStore::new())),
        GraphBackend::SurrealDb => {
            let store = SurrealDbStore::new(config).await?;
            store.init_schema().await?;
            Ok(Arc::new(store))
        }
    }
}
