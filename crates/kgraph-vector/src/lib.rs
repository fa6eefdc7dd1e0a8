//! kgraph Vector - Embeddings and similarity lookup
//!
//! Provides embedding clients and an in-memory vector index over node
//! embeddings, used to find seed nodes similar to a question.

pub mod embedding;
pub mod http;

pub use embedding::{
    create_embedding_client, EmbeddingClient, HashEmbedding, OllamaEmbedding, OpenAiEmbedding,
};

use kgraph_core::{KgError, Result};

/// A stored vector with the key of the item it describes
#[derive(Debug, Clone)]
pub struct EmbeddingVector {
    pub key: String,
    pub vector: Vec<f32>,
}

/// A scored lookup hit
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityHit {
    pub key: String,
    pub score: f32,
}

/// Brute-force cosine similarity index
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    entries: Vec<EmbeddingVector>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a vector; all vectors must share one dimension
    pub fn insert(&mut self, key: impl Into<String>, mut vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(KgError::Validation("empty embedding vector".to_string()));
        }
        match self.dimension {
            Some(dim) if dim != vector.len() => {
                return Err(KgError::Validation(format!(
                    "embedding dimension {} does not match index dimension {dim}",
                    vector.len()
                )));
            }
            None => self.dimension = Some(vector.len()),
            _ => {}
        }

        normalize(&mut vector);
        let key = key.into();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => existing.vector = vector,
            None => self.entries.push(EmbeddingVector { key, vector }),
        }
        Ok(())
    }

    /// Top `limit` entries scoring at least `min_score`, best first
    pub fn search(&self, query: &[f32], limit: usize, min_score: f32) -> Vec<SimilarityHit> {
        let mut hits: Vec<SimilarityHit> = self
            .entries
            .iter()
            .map(|e| SimilarityHit {
                key: e.key.clone(),
                score: cosine_similarity(query, &e.vector),
            })
            .filter(|h| h.score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(limit);
        hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// Cosine similarity; 0.0 for empty or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scale a vector to unit length in place
pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_orders_by_score() {
        let mut index = VectorIndex::new();
        index.insert("phone", vec![1.0, 0.0, 0.0]).unwrap();
        index.insert("store", vec![0.0, 1.0, 0.0]).unwrap();
        index.insert("device", vec![0.9, 0.1, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2, 0.5);
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["phone", "device"]);
    }

    #[test]
    fn test_insert_rejects_dimension_mismatch() {
        let mut index = VectorIndex::new();
        index.insert("a", vec![1.0, 0.0]).unwrap();
        assert!(index.insert("b", vec![1.0, 0.0, 0.0]).is_err());
        assert!(index.insert("c", vec![]).is_err());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let mut index = VectorIndex::new();
        index.insert("a", vec![1.0, 0.0]).unwrap();
        index.insert("a", vec![0.0, 1.0]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.search(&[0.0, 1.0], 1, 0.9)[0].key, "a");
    }
}
