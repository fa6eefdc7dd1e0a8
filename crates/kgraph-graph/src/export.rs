//! Snapshot export for visualization
//!
//! Converts a [`GraphSnapshot`] into a petgraph [`DiGraph`], then renders
//! Graphviz DOT or pretty JSON.

use std::collections::HashMap;

use kgraph_core::{Edge, GraphSnapshot, KgError, Node, Result};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};

/// A snapshot loaded into petgraph, with a key to index lookup
#[derive(Debug, Clone, Default)]
pub struct SnapshotGraph {
    pub graph: DiGraph<Node, Edge>,
    pub index_of: HashMap<String, NodeIndex>,
}

impl SnapshotGraph {
    /// Index of the node with a normalized key
    pub fn node_index(&self, key: &str) -> Option<NodeIndex> {
        self.index_of.get(key).copied()
    }
}

/// Build a petgraph view of a snapshot.
///
/// Edges whose endpoints are missing are skipped.
pub fn to_petgraph(snapshot: &GraphSnapshot) -> SnapshotGraph {
    let mut graph = DiGraph::with_capacity(snapshot.node_count(), snapshot.edge_count());
    let mut index_of = HashMap::with_capacity(snapshot.node_count());

    for node in &snapshot.nodes {
        let idx = graph.add_node(node.clone());
        index_of.insert(node.key.clone(), idx);
    }

    for edge in &snapshot.edges {
        match (index_of.get(&edge.from), index_of.get(&edge.to)) {
            (Some(&from), Some(&to)) => {
                graph.add_edge(from, to, edge.clone());
            }
            _ => tracing::warn!(from = %edge.from, to = %edge.to, "Skipping dangling edge"),
        }
    }

    SnapshotGraph { graph, index_of }
}

/// Render a snapshot as Graphviz DOT, labelled with canonical names
pub fn to_dot(snapshot: &GraphSnapshot) -> String {
    let view = to_petgraph(snapshot);
    let labelled = view
        .graph
        .map(|_, node| node.label.clone(), |_, edge| edge.label.clone());
    format!("{}", Dot::new(&labelled))
}

/// Render a snapshot as pretty JSON
pub fn to_json(snapshot: &GraphSnapshot) -> Result<String> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|e| KgError::Persistence(format!("serialize snapshot: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> GraphSnapshot {
        GraphSnapshot {
            nodes: vec![
                Node::from_name("Josh Milligan"),
                Node::from_name("Blackberry Torch"),
            ],
            edges: vec![Edge::new("josh milligan", "blackberry torch", "wants")],
        }
    }

    #[test]
    fn test_to_petgraph() {
        let view = to_petgraph(&snapshot());
        assert_eq!(view.graph.node_count(), 2);
        assert_eq!(view.graph.edge_count(), 1);
        assert!(view.node_index("josh milligan").is_some());
        assert!(view.node_index("erica").is_none());
    }

    #[test]
    fn test_to_dot_uses_labels() {
        let dot = to_dot(&snapshot());
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("Josh Milligan"));
        assert!(dot.contains("wants"));
    }

    #[test]
    fn test_to_json_roundtrip() {
        let json = to_json(&snapshot()).unwrap();
        let parsed: GraphSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot());
    }
}
