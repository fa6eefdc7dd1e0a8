//! Retrieval index over the knowledge graph
//!
//! A [`KnowledgeIndex`] is derived from a [`GraphSnapshot`] and never holds
//! anything that cannot be rebuilt from the store, apart from chunk texts
//! kept for `include_text`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use kgraph_core::{Chunk, GraphSnapshot};
use kgraph_graph::export::{to_petgraph, SnapshotGraph};
use kgraph_vector::{EmbeddingClient, VectorIndex};
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tokio::sync::RwLock;

use crate::analysis::tokenize;
use crate::cache::EmbeddingCache;

/// One edge of the retrieved subgraph, rendered with canonical labels
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedTriplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Hop distance from the nearest seed
    pub depth: usize,
    pub source_chunk: Option<String>,
}

impl fmt::Display for RetrievedTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// In-memory retrieval structures for one graph generation
#[derive(Debug, Default)]
pub struct KnowledgeIndex {
    generation: u64,
    view: SnapshotGraph,
    tokens: HashMap<String, Vec<NodeIndex>>,
    vectors: Option<VectorIndex>,
    chunk_texts: HashMap<String, String>,
}

impl KnowledgeIndex {
    /// Generation of the graph this index was built from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn node_count(&self) -> usize {
        self.view.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.view.graph.edge_count()
    }

    pub fn has_embeddings(&self) -> bool {
        self.vectors.as_ref().is_some_and(|v| !v.is_empty())
    }

    fn degree(&self, idx: NodeIndex) -> usize {
        self.view.graph.neighbors_undirected(idx).count()
    }

    fn key(&self, idx: NodeIndex) -> String {
        self.view.graph[idx].key.clone()
    }

    /// Nodes whose key tokens match the keywords.
    ///
    /// Ranked by matched keyword count, then degree, then key.
    pub fn keyword_seeds(&self, keywords: &[String], limit: usize) -> Vec<String> {
        let mut scores: HashMap<NodeIndex, usize> = HashMap::new();
        for keyword in keywords {
            if let Some(nodes) = self.tokens.get(keyword) {
                for &idx in nodes {
                    *scores.entry(idx).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(usize, usize, String)> = scores
            .into_iter()
            .map(|(idx, score)| (score, self.degree(idx), self.key(idx)))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));

        ranked.into_iter().take(limit).map(|(_, _, key)| key).collect()
    }

    /// Highest-degree nodes, ties broken by key
    pub fn top_degree(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<(usize, String)> = self
            .view
            .graph
            .node_indices()
            .map(|idx| (self.degree(idx), self.key(idx)))
            .filter(|(degree, _)| *degree > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        ranked.into_iter().take(limit).map(|(_, key)| key).collect()
    }

    /// Nodes whose label embedding is close to the query embedding
    pub fn similar(&self, query: &[f32], limit: usize, min_score: f32) -> Vec<String> {
        match &self.vectors {
            Some(vectors) => vectors
                .search(query, limit, min_score)
                .into_iter()
                .map(|hit| hit.key)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Breadth-first traversal over both edge directions.
    ///
    /// Returns every edge incident to a node closer than `max_hops` to a
    /// seed, ordered by depth, then subject key, label and object key.
    pub fn traverse(&self, seeds: &[String], max_hops: usize) -> Vec<RetrievedTriplet> {
        let graph = &self.view.graph;
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();

        for seed in seeds {
            if let Some(idx) = self.view.node_index(seed) {
                if visited.insert(idx) {
                    queue.push_back((idx, 0));
                }
            }
        }

        let mut collected: HashMap<EdgeIndex, usize> = HashMap::new();
        while let Some((idx, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }

            let incident = graph
                .edges_directed(idx, Direction::Outgoing)
                .chain(graph.edges_directed(idx, Direction::Incoming));
            for edge in incident {
                collected.entry(edge.id()).or_insert(depth + 1);

                let neighbor = if edge.source() == idx {
                    edge.target()
                } else {
                    edge.source()
                };
                if visited.insert(neighbor) {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }

        let mut edges: Vec<(usize, EdgeIndex)> =
            collected.into_iter().map(|(e, d)| (d, e)).collect();
        edges.sort_by(|a, b| {
            let (ea, eb) = (&graph[a.1], &graph[b.1]);
            a.0.cmp(&b.0)
                .then_with(|| ea.from.cmp(&eb.from))
                .then_with(|| ea.label.cmp(&eb.label))
                .then_with(|| ea.to.cmp(&eb.to))
        });

        edges
            .into_iter()
            .filter_map(|(depth, e)| {
                let (from, to) = graph.edge_endpoints(e)?;
                let edge = &graph[e];
                Some(RetrievedTriplet {
                    subject: graph[from].label.clone(),
                    predicate: edge.label.clone(),
                    object: graph[to].label.clone(),
                    depth,
                    source_chunk: edge.source_chunk.clone(),
                })
            })
            .collect()
    }

    /// Source text of a chunk, if it was recorded at ingestion
    pub fn chunk_text(&self, chunk_id: &str) -> Option<&str> {
        self.chunk_texts.get(chunk_id).map(String::as_str)
    }
}

/// Builds [`KnowledgeIndex`] values from graph snapshots
pub struct IndexBuilder {
    embedder: Option<Arc<dyn EmbeddingClient>>,
    cache: EmbeddingCache,
    chunk_texts: RwLock<HashMap<String, String>>,
}

impl IndexBuilder {
    pub fn new(embedder: Option<Arc<dyn EmbeddingClient>>) -> Self {
        Self {
            embedder,
            cache: EmbeddingCache::new(),
            chunk_texts: RwLock::new(HashMap::new()),
        }
    }

    pub fn embedder(&self) -> Option<&Arc<dyn EmbeddingClient>> {
        self.embedder.as_ref()
    }

    /// Retain chunk texts for `include_text` retrieval
    pub async fn record_chunks(&self, chunks: &[Chunk]) {
        let mut texts = self.chunk_texts.write().await;
        for chunk in chunks {
            texts.insert(chunk.id.clone(), chunk.text.clone());
        }
    }

    pub async fn clear_chunks(&self) {
        self.chunk_texts.write().await.clear();
    }

    /// Build an index from a snapshot taken at `generation`.
    ///
    /// Embedding failures are logged and the index is built without
    /// similarity lookup.
    pub async fn build(&self, snapshot: &GraphSnapshot, generation: u64) -> KnowledgeIndex {
        let view = to_petgraph(snapshot);

        let mut tokens: HashMap<String, Vec<NodeIndex>> = HashMap::new();
        for idx in view.graph.node_indices() {
            let key = &view.graph[idx].key;
            let mut node_tokens: HashSet<String> = tokenize(key).into_iter().collect();
            node_tokens.insert(key.clone());
            for token in node_tokens {
                tokens.entry(token).or_default().push(idx);
            }
        }

        let vectors = match &self.embedder {
            Some(embedder) => self.embed_nodes(embedder.as_ref(), snapshot).await,
            None => None,
        };

        let chunk_texts = self.chunk_texts.read().await.clone();

        tracing::debug!(
            generation,
            nodes = view.graph.node_count(),
            edges = view.graph.edge_count(),
            embeddings = vectors.as_ref().map(VectorIndex::len).unwrap_or(0),
            "Built knowledge index"
        );

        KnowledgeIndex {
            generation,
            view,
            tokens,
            vectors,
            chunk_texts,
        }
    }

    async fn embed_nodes(
        &self,
        embedder: &dyn EmbeddingClient,
        snapshot: &GraphSnapshot,
    ) -> Option<VectorIndex> {
        let mut index = VectorIndex::new();
        let mut pending = Vec::new();

        for node in &snapshot.nodes {
            let cached = match &node.embedding {
                Some(vector) => Some(vector.clone()),
                None => self.cache.get(&node.label).await,
            };
            match cached {
                Some(vector) => {
                    if let Err(e) = index.insert(node.key.clone(), vector) {
                        tracing::warn!(node = %node.key, error = %e, "Skipping node embedding");
                    }
                }
                None => pending.push(node),
            }
        }

        if !pending.is_empty() {
            let labels: Vec<String> = pending.iter().map(|n| n.label.clone()).collect();
            let vectors = match embedder.embed_batch(&labels).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    tracing::warn!(error = %e, "Node embedding failed; similarity lookup disabled");
                    return None;
                }
            };

            for (node, vector) in pending.into_iter().zip(vectors) {
                self.cache.put(&node.label, vector.clone()).await;
                if let Err(e) = index.insert(node.key.clone(), vector) {
                    tracing::warn!(node = %node.key, error = %e, "Skipping node embedding");
                }
            }
        }

        Some(index)
    }

    /// Embed a question, logging and dropping failures
    pub async fn embed_query(&self, question: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(question).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(error = %e, "Question embedding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::{Edge, Node};
    use kgraph_vector::HashEmbedding;

    fn snapshot() -> GraphSnapshot {
        let mut edge = Edge::new("josh milligan", "blackberry torch", "wants to exchange");
        edge.source_chunk = Some("doc#0".to_string());
        GraphSnapshot {
            nodes: vec![
                Node::from_name("Josh Milligan"),
                Node::from_name("Blackberry Torch"),
                Node::from_name("AT&T"),
                Node::from_name("Erica"),
                Node::from_name("Screen"),
            ],
            edges: vec![
                edge,
                Edge::new("erica", "at&t", "works for"),
                Edge::new("josh milligan", "at&t", "calls"),
                Edge::new("blackberry torch", "screen", "has broken"),
            ],
        }
    }

    async fn index() -> KnowledgeIndex {
        IndexBuilder::new(None).build(&snapshot(), 7).await
    }

    #[tokio::test]
    async fn test_build_records_generation() {
        let index = index().await;
        assert_eq!(index.generation(), 7);
        assert_eq!(index.node_count(), 5);
        assert_eq!(index.edge_count(), 4);
        assert!(!index.has_embeddings());
    }

    #[tokio::test]
    async fn test_keyword_seeds_ranked_by_matches() {
        let index = index().await;
        let keywords = vec!["josh".to_string(), "milligan".to_string(), "at&t".to_string()];
        assert_eq!(index.keyword_seeds(&keywords, 10), vec!["josh milligan", "at&t"]);
        assert!(index.keyword_seeds(&["nokia".to_string()], 10).is_empty());
    }

    #[tokio::test]
    async fn test_top_degree() {
        let index = index().await;
        assert_eq!(
            index.top_degree(3),
            vec!["at&t", "blackberry torch", "josh milligan"]
        );
    }

    #[tokio::test]
    async fn test_traverse_respects_hops() {
        let index = index().await;
        let seeds = vec!["erica".to_string()];

        let one: Vec<String> = index.traverse(&seeds, 1).iter().map(|t| t.to_string()).collect();
        assert_eq!(one, vec!["(Erica, works for, AT&T)"]);

        let two: Vec<String> = index.traverse(&seeds, 2).iter().map(|t| t.to_string()).collect();
        assert_eq!(
            two,
            vec!["(Erica, works for, AT&T)", "(Josh Milligan, calls, AT&T)"]
        );

        assert!(index.traverse(&seeds, 0).is_empty());
        assert!(index.traverse(&["nobody".to_string()], 3).is_empty());
    }

    #[tokio::test]
    async fn test_traverse_keeps_source_chunk() {
        let index = index().await;
        let triplets = index.traverse(&["blackberry torch".to_string()], 1);
        let exchange = triplets
            .iter()
            .find(|t| t.predicate == "wants to exchange")
            .unwrap();
        assert_eq!(exchange.source_chunk.as_deref(), Some("doc#0"));
        assert_eq!(exchange.depth, 1);
    }

    #[tokio::test]
    async fn test_similarity_with_hash_embeddings() {
        let builder = IndexBuilder::new(Some(Arc::new(HashEmbedding::new(64))));
        let index = builder.build(&snapshot(), 1).await;
        assert!(index.has_embeddings());

        let query = builder.embed_query("Blackberry Torch").await.unwrap();
        let hits = index.similar(&query, 1, 0.5);
        assert_eq!(hits, vec!["blackberry torch"]);
    }

    #[tokio::test]
    async fn test_chunk_texts_are_recorded() {
        let builder = IndexBuilder::new(None);
        let doc = kgraph_core::Document::new("Josh called.");
        builder
            .record_chunks(&[Chunk::new(doc.id(), 0, "Josh called.", 0, 12)])
            .await;
        let index = builder.build(&snapshot(), 1).await;
        let id = format!("{}#0", doc.id());
        assert_eq!(index.chunk_text(&id), Some("Josh called."));

        builder.clear_chunks().await;
        assert!(builder.build(&snapshot(), 2).await.chunk_text(&id).is_none());
    }
}
