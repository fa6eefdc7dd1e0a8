//! In-process graph store
//!
//! BTree-backed so exports are ordered. Batches are validated before any
//! mutation, which makes `apply` all-or-nothing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kgraph_core::{EdgeKey, Edge, GraphBatch, GraphSnapshot, KgError, Node, Result};
use tokio::sync::RwLock;

use crate::GraphStore;

#[derive(Debug, Default)]
struct MemoryGraph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
}

impl MemoryGraph {
    fn merge(&mut self, batch: &GraphBatch) {
        for node in &batch.nodes {
            self.nodes
                .entry(node.key.clone())
                .and_modify(|existing| existing.merge(node))
                .or_insert_with(|| node.clone());
        }

        for edge in &batch.edges {
            self.edges.entry(edge.key()).or_insert_with(|| edge.clone());
        }
    }
}

/// Every edge endpoint must be stored already or arrive in the batch
fn check_endpoints(graph: &MemoryGraph, batch: &GraphBatch) -> Result<()> {
    let known =
        |key: &str| graph.nodes.contains_key(key) || batch.nodes.iter().any(|n| n.key == key);

    match batch.edges.iter().find(|e| !known(&e.from) || !known(&e.to)) {
        Some(edge) => Err(KgError::Validation(format!(
            "edge ({}) -[{}]-> ({}) references a missing node",
            edge.from, edge.label, edge.to
        ))),
        None => Ok(()),
    }
}

/// In-memory graph store
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<MemoryGraph>,
}

impl MemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding a snapshot
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = MemoryGraph::default();
        for node in snapshot.nodes {
            graph.nodes.insert(node.key.clone(), node);
        }
        for edge in snapshot.edges {
            graph.edges.insert(edge.key(), edge);
        }
        Self {
            state: RwLock::new(graph),
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.nodes.clear();
        state.edges.clear();
        Ok(())
    }

    async fn apply(&self, batch: &GraphBatch) -> Result<()> {
        let mut state = self.state.write().await;
        // Validate everything before touching the maps
        check_endpoints(&state, batch)?;
        state.merge(batch);
        Ok(())
    }

    async fn replace(&self, batch: &GraphBatch) -> Result<()> {
        let mut next = MemoryGraph::default();
        check_endpoints(&next, batch)?;
        next.merge(batch);

        *self.state.write().await = next;
        Ok(())
    }

    async fn count_nodes(&self) -> Result<usize> {
        Ok(self.state.read().await.nodes.len())
    }

    async fn count_edges(&self) -> Result<usize> {
        Ok(self.state.read().await.edges.len())
    }

    async fn export(&self) -> Result<GraphSnapshot> {
        let state = self.state.read().await;
        Ok(GraphSnapshot {
            nodes: state.nodes.values().cloned().collect(),
            edges: state.edges.values().cloned().collect(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(pairs: &[(&str, &str, &str)]) -> GraphBatch {
        let mut batch = GraphBatch::default();
        for (s, p, o) in pairs {
            batch.nodes.push(Node::from_name(s));
            batch.nodes.push(Node::from_name(o));
            batch.edges.push(Edge::new(Node::from_name(s).key, Node::from_name(o).key, p));
        }
        batch
    }

    #[tokio::test]
    async fn test_apply_merges_duplicates() {
        let store = MemoryGraphStore::new();
        let b = batch(&[("AT&T", "employs", "Erica")]);

        store.apply(&b).await.unwrap();
        store.apply(&b).await.unwrap();

        assert_eq!(store.count_nodes().await.unwrap(), 2);
        assert_eq!(store.count_edges().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_distinct_labels_are_distinct_edges() {
        let store = MemoryGraphStore::new();
        store
            .apply(&batch(&[
                ("Josh", "owns", "phone"),
                ("Josh", "returns", "phone"),
            ]))
            .await
            .unwrap();

        assert_eq!(store.count_edges().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dangling_edge_rejects_whole_batch() {
        let store = MemoryGraphStore::new();
        let mut b = batch(&[("Josh", "owns", "phone")]);
        b.edges.push(Edge::new("josh", "ghost", "haunts"));

        assert!(store.apply(&b).await.is_err());
        assert_eq!(store.count_nodes().await.unwrap(), 0);
        assert_eq!(store.count_edges().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryGraphStore::new();
        store
            .apply(&batch(&[("Josh", "owns", "phone")]))
            .await
            .unwrap();
        store.clear().await.unwrap();

        assert_eq!(store.count_nodes().await.unwrap(), 0);
        assert_eq!(store.count_edges().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_graph() {
        let store = MemoryGraphStore::new();
        store
            .apply(&batch(&[("Josh", "owns", "phone")]))
            .await
            .unwrap();

        store
            .replace(&batch(&[("Erica", "works for", "AT&T")]))
            .await
            .unwrap();

        let snapshot = store.export().await.unwrap();
        let keys: Vec<&str> = snapshot.nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["at&t", "erica"]);
        assert_eq!(snapshot.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_replace_keeps_previous_graph() {
        let store = MemoryGraphStore::new();
        store
            .apply(&batch(&[("Josh", "owns", "phone")]))
            .await
            .unwrap();

        // "josh" exists now but not in the replacement
        let mut b = batch(&[("Erica", "works for", "AT&T")]);
        b.edges.push(Edge::new("erica", "josh", "helps"));

        assert!(store.replace(&b).await.is_err());
        assert_eq!(store.count_nodes().await.unwrap(), 2);
        assert_eq!(store.count_edges().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_from_snapshot_roundtrip() {
        let store = MemoryGraphStore::new();
        store
            .apply(&batch(&[("Josh", "owns", "phone"), ("Erica", "helps", "Josh")]))
            .await
            .unwrap();

        let snapshot = store.export().await.unwrap();
        let restored = MemoryGraphStore::from_snapshot(snapshot.clone());
        assert_eq!(restored.export().await.unwrap(), snapshot);
    }
}
