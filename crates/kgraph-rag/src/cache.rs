//! Caching layer for retrieval
//!
//! Provides concurrent caching for:
//! - Node label embeddings (to avoid re-embedding on every index rebuild)
//! - Query responses, keyed by graph generation so a write invalidates them
//!
//! Uses the moka crate for thread-safe, async-compatible caching with TTL.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::query::QueryResponse;

// ============================================================================
// Cache Configuration
// ============================================================================

/// Configuration for cache behavior
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in embedding cache
    pub embedding_max_capacity: u64,

    /// Maximum number of entries in query cache
    pub query_max_capacity: u64,

    /// Time-to-live for embedding cache entries (in seconds)
    pub embedding_ttl_seconds: u64,

    /// Time-to-live for query cache entries (in seconds)
    pub query_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_max_capacity: 10_000,
            query_max_capacity: 1_000,
            embedding_ttl_seconds: 3600,
            query_ttl_seconds: 300,
        }
    }
}

impl CacheConfig {
    /// Take query cache sizing from the query config
    pub fn from_query_config(config: &kgraph_core::QueryConfig) -> Self {
        Self {
            query_max_capacity: config.cache_max_capacity,
            query_ttl_seconds: config.cache_ttl_seconds,
            ..Default::default()
        }
    }
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Embedding Cache
// ============================================================================

/// Cache for label embeddings
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<u64, Vec<f32>>,
    stats: Arc<CacheStats>,
}

impl EmbeddingCache {
    /// Create a new embedding cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a new embedding cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.embedding_max_capacity)
            .time_to_live(Duration::from_secs(config.embedding_ttl_seconds))
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("embedding")),
        }
    }

    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let result = self.cache.get(&hash_text(text)).await;
        self.stats.record(result.is_some());
        result
    }

    pub async fn put(&self, text: &str, embedding: Vec<f32>) {
        self.cache.insert(hash_text(text), embedding).await;
        self.stats.record_write();
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Query Cache
// ============================================================================

/// Key for query cache entries
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct QueryKey {
    generation: u64,
    question_hash: u64,
}

impl QueryKey {
    fn new(generation: u64, question: &str) -> Self {
        Self {
            generation,
            question_hash: hash_text(question.trim()),
        }
    }
}

/// Cache for query responses.
///
/// Entries are pinned to the generation they were computed at, so a
/// response never outlives the graph state it describes.
#[derive(Clone)]
pub struct QueryCache {
    cache: Cache<QueryKey, QueryResponse>,
    stats: Arc<CacheStats>,
}

impl QueryCache {
    /// Create a new query cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a new query cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.query_max_capacity)
            .time_to_live(Duration::from_secs(config.query_ttl_seconds))
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("query")),
        }
    }

    pub async fn get(&self, generation: u64, question: &str) -> Option<QueryResponse> {
        let result = self.cache.get(&QueryKey::new(generation, question)).await;
        self.stats.record(result.is_some());
        result
    }

    pub async fn put(&self, generation: u64, question: &str, response: QueryResponse) {
        self.cache
            .insert(QueryKey::new(generation, question), response)
            .await;
        self.stats.record_write();
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Hit/miss counters for one cache
#[derive(Debug)]
pub struct CacheStats {
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub hit_rate: f64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn response(answer: &str, generation: u64) -> QueryResponse {
        QueryResponse {
            answer: answer.to_string(),
            triplets: vec!["(Josh, owns, phone)".to_string()],
            seeds: vec!["josh".to_string()],
            generation,
            elapsed_ms: 3,
        }
    }

    #[tokio::test]
    async fn test_embedding_cache_roundtrip() {
        let cache = EmbeddingCache::new();
        assert!(cache.get("Blackberry Torch").await.is_none());

        cache.put("Blackberry Torch", vec![0.1, 0.2]).await;
        assert_eq!(cache.get("Blackberry Torch").await, Some(vec![0.1, 0.2]));

        let report = cache.stats().report();
        assert_eq!((report.hits, report.misses, report.writes), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_query_cache_is_pinned_to_generation() {
        let cache = QueryCache::new();
        cache.put(3, "Who called?", response("Josh", 3)).await;

        assert_eq!(cache.get(3, "Who called?").await.unwrap().answer, "Josh");
        assert_eq!(cache.get(3, "  Who called?  ").await.unwrap().answer, "Josh");
        assert!(cache.get(4, "Who called?").await.is_none());
    }

    #[test]
    fn test_hit_rate_without_requests() {
        let stats = CacheStats::new("empty");
        assert_eq!(stats.hit_rate(), 0.0);
    }
}
