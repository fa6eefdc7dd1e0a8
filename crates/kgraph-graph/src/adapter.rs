//! Knowledge graph store adapter
//!
//! Turns extracted triplets into deduplicated, referentially consistent
//! batches and writes them through a [`GraphStore`] backend. Writes are
//! serialized so two batches never race on the same node key, and every
//! committed batch or clear advances a generation counter that readers use
//! to detect stale indexes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kgraph_core::{
    Edge, EdgeKey, GraphBatch, GraphConfig, GraphSnapshot, KgError, Node, Result, Triplet,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::GraphStore;

/// File name of a persisted graph snapshot
pub const SNAPSHOT_FILE: &str = "graph_store.json";

/// Outcome of one `upsert` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    /// Triplets handed to the adapter
    pub triplets_received: usize,
    /// Triplets whose normalized parts were empty
    pub triplets_rejected: usize,
    /// Distinct nodes written in the batch
    pub nodes_written: usize,
    /// Distinct edges written in the batch
    pub edges_written: usize,
    /// Generation after the batch committed
    pub generation: u64,
}

/// Accumulates nodes and edges, collapsing duplicates by key
#[derive(Debug, Default)]
struct BatchBuilder {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
    rejected: usize,
}

impl BatchBuilder {
    fn add_node(&mut self, name: &str) -> String {
        let node = Node::from_name(name);
        let key = node.key.clone();
        self.nodes
            .entry(key.clone())
            .and_modify(|existing| existing.merge(&node))
            .or_insert(node);
        key
    }

    fn add_triplet(&mut self, triplet: &Triplet) {
        let (subject, label, object) = triplet.identity();
        if subject.is_empty() || label.is_empty() || object.is_empty() {
            self.rejected += 1;
            return;
        }

        let from = self.add_node(&triplet.subject);
        let to = self.add_node(&triplet.object);

        let mut edge = Edge::new(from, to, &label);
        edge.source_chunk = triplet.source.as_ref().map(|s| s.chunk_id.clone());
        self.edges.entry(edge.key()).or_insert(edge);
    }

    fn finish(self) -> (GraphBatch, usize) {
        (
            GraphBatch {
                nodes: self.nodes.into_values().collect(),
                edges: self.edges.into_values().collect(),
            },
            self.rejected,
        )
    }
}

/// Graph store adapter over a pluggable backend
pub struct KnowledgeGraphStore {
    backend: Arc<dyn GraphStore>,
    write_lock: Mutex<()>,
    generation: AtomicU64,
    max_retries: u32,
    retry_backoff: Duration,
}

impl KnowledgeGraphStore {
    /// Wrap a backend with default retry policy
    pub fn new(backend: Arc<dyn GraphStore>) -> Self {
        let defaults = GraphConfig::default();
        Self {
            backend,
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            max_retries: defaults.store_max_retries,
            retry_backoff: Duration::from_millis(defaults.retry_backoff_ms),
        }
    }

    /// Override the store retry policy
    pub fn with_retry(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Connect the configured backend
    pub async fn from_config(config: &GraphConfig) -> Result<Self> {
        let backend = crate::connect(config).await?;
        Ok(Self::new(backend).with_retry(
            config.store_max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        ))
    }

    /// Normalize triplets into a batch.
    ///
    /// Returns the batch and the number of triplets rejected for having an
    /// empty normalized part. Every edge endpoint appears in `nodes`.
    pub fn build_batch(triplets: &[Triplet]) -> (GraphBatch, usize) {
        let mut builder = BatchBuilder::default();
        for triplet in triplets {
            builder.add_triplet(triplet);
        }
        builder.finish()
    }

    /// Delete every node and edge
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.with_store_retry("clear", || self.backend.clear()).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(backend = self.backend.name(), generation, "Cleared graph");
        Ok(())
    }

    /// Upsert triplets as one atomic batch
    pub async fn upsert(&self, triplets: &[Triplet]) -> Result<UpsertReport> {
        let (batch, rejected) = Self::build_batch(triplets);
        if rejected > 0 {
            tracing::warn!(rejected, "Dropped triplets with empty normalized parts");
        }

        let _guard = self.write_lock.lock().await;

        let generation = if batch.is_empty() {
            self.generation.load(Ordering::SeqCst)
        } else {
            self.with_store_retry("apply", || self.backend.apply(&batch))
                .await?;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let report = UpsertReport {
            triplets_received: triplets.len(),
            triplets_rejected: rejected,
            nodes_written: batch.nodes.len(),
            edges_written: batch.edges.len(),
            generation,
        };

        tracing::debug!(
            nodes = report.nodes_written,
            edges = report.edges_written,
            generation,
            "Upserted batch"
        );

        Ok(report)
    }

    pub async fn count_nodes(&self) -> Result<usize> {
        self.backend.count_nodes().await
    }

    pub async fn count_edges(&self) -> Result<usize> {
        self.backend.count_edges().await
    }

    /// Full node and edge sets, sorted
    pub async fn export(&self) -> Result<GraphSnapshot> {
        Ok(self.backend.export().await?.sorted())
    }

    /// Export pinned to a generation.
    ///
    /// Holds the write lock so no batch can commit between reading the
    /// generation and reading the graph.
    pub async fn snapshot(&self) -> Result<(u64, GraphSnapshot)> {
        let _guard = self.write_lock.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        let snapshot = self.backend.export().await?.sorted();
        Ok((generation, snapshot))
    }

    /// Generation of the last committed write
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Write the graph to `dir/graph_store.json`
    pub async fn persist(&self, dir: &Path) -> Result<std::path::PathBuf> {
        let (generation, snapshot) = self.snapshot().await?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| KgError::Persistence(format!("{}: {e}", dir.display())))?;

        let path = dir.join(SNAPSHOT_FILE);
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| KgError::Persistence(format!("serialize snapshot: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| KgError::Persistence(format!("{}: {e}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            generation,
            "Persisted graph"
        );

        Ok(path)
    }

    /// Replace the graph with the snapshot stored in `dir`
    pub async fn load(&self, dir: &Path) -> Result<GraphSnapshot> {
        let path = dir.join(SNAPSHOT_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| KgError::Persistence(format!("{}: {e}", path.display())))?;
        let snapshot: GraphSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| KgError::Persistence(format!("parse {}: {e}", path.display())))?;

        let dangling = snapshot.dangling_edges().len();
        if dangling > 0 {
            return Err(KgError::Persistence(format!(
                "{} has {dangling} edges referencing missing nodes",
                path.display()
            )));
        }

        let batch = GraphBatch {
            nodes: snapshot.nodes.clone(),
            edges: snapshot.edges.clone(),
        };

        let _guard = self.write_lock.lock().await;
        self.with_store_retry("replace", || self.backend.replace(&batch))
            .await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            path = %path.display(),
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            generation,
            "Loaded graph"
        );

        Ok(snapshot)
    }

    async fn with_store_retry<F, Fut>(&self, op: &str, mut call: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Graph store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
