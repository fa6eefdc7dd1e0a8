//! Query engine
//!
//! Seeds → bounded traversal → serialized triplets → synthesis. The engine
//! only reads the graph; it rebuilds its index whenever the store has
//! committed a newer generation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use kgraph_core::{KgError, LlmClient, QueryConfig, Result};
use kgraph_graph::KnowledgeGraphStore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::analysis::{analyze_query, parse_keywords, QueryIntent};
use crate::cache::{CacheConfig, CacheStatsReport, QueryCache};
use crate::index::{IndexBuilder, KnowledgeIndex};
use crate::synthesize::Synthesizer;

/// Answer returned when nothing in the graph relates to the question
pub const NO_RELEVANT_INFO: &str = "No relevant information found in the knowledge graph.";

const KEYWORD_TEMPLATE: &str = include_str!("prompts/keywords.txt");
const MAX_MODEL_KEYWORDS: usize = 10;

/// Answer plus the context it was derived from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Synthesized answer
    pub answer: String,

    /// Retrieved triplets, as passed to the model
    pub triplets: Vec<String>,

    /// Keys of the seed nodes
    pub seeds: Vec<String>,

    /// Graph generation the answer was computed against
    pub generation: u64,

    /// Processing time in milliseconds
    pub elapsed_ms: u64,
}

impl QueryResponse {
    fn no_information(generation: u64, seeds: Vec<String>, elapsed_ms: u64) -> Self {
        Self {
            answer: NO_RELEVANT_INFO.to_string(),
            triplets: Vec::new(),
            seeds,
            generation,
            elapsed_ms,
        }
    }

    /// True when nothing relevant was retrieved
    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }
}

/// Graph-backed question answering
pub struct QueryEngine {
    store: Arc<KnowledgeGraphStore>,
    llm: Arc<dyn LlmClient>,
    builder: Arc<IndexBuilder>,
    index: RwLock<Option<Arc<KnowledgeIndex>>>,
    config: QueryConfig,
    cache: Option<QueryCache>,
    synthesizer: Synthesizer,
}

impl QueryEngine {
    pub fn new(
        store: Arc<KnowledgeGraphStore>,
        llm: Arc<dyn LlmClient>,
        builder: Arc<IndexBuilder>,
        config: QueryConfig,
    ) -> Self {
        let cache = (config.cache_ttl_seconds > 0)
            .then(|| QueryCache::with_config(&CacheConfig::from_query_config(&config)));
        let synthesizer = Synthesizer::new(Arc::clone(&llm), &config);

        Self {
            store,
            llm,
            builder,
            index: RwLock::new(None),
            config,
            cache,
            synthesizer,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Current index, rebuilt if the store has moved past it
    pub async fn refresh_index(&self) -> Result<Arc<KnowledgeIndex>> {
        if let Some(index) = self.index.read().await.as_ref() {
            if index.generation() == self.store.generation() {
                return Ok(Arc::clone(index));
            }
        }

        let mut slot = self.index.write().await;
        if let Some(index) = slot.as_ref() {
            if index.generation() == self.store.generation() {
                return Ok(Arc::clone(index));
            }
        }

        let (generation, snapshot) = self.store.snapshot().await?;
        let index = Arc::new(self.builder.build(&snapshot, generation).await);
        *slot = Some(Arc::clone(&index));

        tracing::info!(
            generation,
            nodes = index.node_count(),
            edges = index.edge_count(),
            "Index rebuilt"
        );
        Ok(index)
    }

    /// Answer a question
    pub async fn query(&self, question: &str) -> Result<String> {
        Ok(self.query_detailed(question).await?.answer)
    }

    /// Answer a question, returning the retrieved context as well
    pub async fn query_detailed(&self, question: &str) -> Result<QueryResponse> {
        let start = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(KgError::Validation("question is empty".to_string()));
        }

        let index = self.refresh_index().await?;
        let generation = index.generation();

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(generation, question).await {
                tracing::debug!(generation, "Query cache hit");
                return Ok(cached);
            }
        }

        let seeds = self.find_seeds(&index, question).await?;
        let response = if seeds.is_empty() {
            tracing::info!(generation, "No seed nodes matched the question");
            QueryResponse::no_information(generation, seeds, elapsed_ms(start))
        } else {
            self.answer_from_seeds(&index, question, seeds, start).await?
        };

        if let Some(cache) = &self.cache {
            cache.put(generation, question, response.clone()).await;
        }
        Ok(response)
    }

    async fn answer_from_seeds(
        &self,
        index: &KnowledgeIndex,
        question: &str,
        seeds: Vec<String>,
        start: Instant,
    ) -> Result<QueryResponse> {
        let generation = index.generation();
        let mut retrieved = index.traverse(&seeds, self.config.max_hops);
        retrieved.truncate(self.config.max_triplets_in_context);

        if retrieved.is_empty() {
            return Ok(QueryResponse::no_information(
                generation,
                seeds,
                elapsed_ms(start),
            ));
        }

        let triplets: Vec<String> = retrieved.iter().map(|t| t.to_string()).collect();
        let mut fragments = triplets.clone();

        if self.config.include_text {
            let mut seen = HashSet::new();
            for triplet in &retrieved {
                let Some(chunk_id) = triplet.source_chunk.as_deref() else {
                    continue;
                };
                if !seen.insert(chunk_id) {
                    continue;
                }
                if let Some(text) = index.chunk_text(chunk_id) {
                    fragments.push(text.to_string());
                }
            }
        }

        let answer = self.synthesizer.synthesize(question, &fragments).await?;

        let response = QueryResponse {
            answer,
            triplets,
            seeds,
            generation,
            elapsed_ms: elapsed_ms(start),
        };

        tracing::info!(
            generation,
            seeds = response.seeds.len(),
            triplets = response.triplets.len(),
            mode = %self.synthesizer.mode(),
            elapsed_ms = response.elapsed_ms,
            "Query answered"
        );
        Ok(response)
    }

    /// Seed nodes from keywords, optional model keywords and embeddings
    async fn find_seeds(&self, index: &KnowledgeIndex, question: &str) -> Result<Vec<String>> {
        let analysis = analyze_query(question);
        let mut keywords = analysis.keywords.clone();

        if self.config.use_llm_keywords {
            let prompt = KEYWORD_TEMPLATE
                .replace("{max_keywords}", &MAX_MODEL_KEYWORDS.to_string())
                .replace("{question}", question);
            let reply = self
                .llm
                .generate(&prompt)
                .await
                .map_err(|e| KgError::Query(format!("keyword extraction failed: {e}")))?;
            for keyword in parse_keywords(&reply) {
                if !keywords.contains(&keyword) {
                    keywords.push(keyword);
                }
            }
        }

        let max_seeds = self.config.max_seeds;
        let mut seeds = index.keyword_seeds(&keywords, max_seeds);

        if self.config.similarity_top_k > 0 && index.has_embeddings() {
            if let Some(vector) = self.builder.embed_query(question).await {
                let similar = index.similar(
                    &vector,
                    self.config.similarity_top_k,
                    self.config.min_similarity,
                );
                for key in similar {
                    if seeds.len() >= max_seeds {
                        break;
                    }
                    if !seeds.contains(&key) {
                        seeds.push(key);
                    }
                }
            }
        }

        if seeds.is_empty() && analysis.intent == QueryIntent::Summary {
            seeds = index.top_degree(max_seeds);
        }

        tracing::debug!(?keywords, ?seeds, "Selected seed nodes");
        Ok(seeds)
    }

    pub fn cache_stats(&self) -> Option<CacheStatsReport> {
        self.cache.as_ref().map(|c| c.stats().report())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
