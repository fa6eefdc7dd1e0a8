//! kgraph RAG - Graph-backed question answering
//!
//! This crate turns the stored knowledge graph into answers:
//! - Question analysis (intent, keywords)
//! - Index building over graph snapshots (keyword tokens, embeddings)
//! - Bounded traversal from seed nodes
//! - Answer synthesis, including recursive tree summarization
//!
//! It also hosts the language-model HTTP clients and the
//! [`KnowledgeGraphPipeline`] that sequences ingestion and querying.

pub mod analysis;
pub mod cache;
pub mod index;
pub mod llm;
pub mod pipeline;
pub mod query;
pub mod synthesize;

pub use analysis::{analyze_query, QueryAnalysis, QueryIntent};
pub use cache::{CacheConfig, CacheStatsReport, EmbeddingCache, QueryCache};
pub use index::{IndexBuilder, KnowledgeIndex, RetrievedTriplet};
pub use llm::{create_llm_client, OllamaClient, OpenAiClient};
pub use pipeline::{GraphStats, IngestionReport, KnowledgeGraphPipeline, KnowledgeGraphReport};
pub use query::{QueryEngine, QueryResponse, NO_RELEVANT_INFO};
pub use synthesize::Synthesizer;
