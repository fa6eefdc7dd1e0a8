//! Knowledge graph workflow
//!
//! Stages: reset → ingest (chunk, extract, upsert) → index → query. A
//! failed chunk extraction is logged and skipped; store and config
//! failures abort the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use kgraph_core::{AppConfig, Document, GraphSnapshot, LlmClient, Result, Triplet};
use kgraph_extractor::TripletExtractor;
use kgraph_graph::KnowledgeGraphStore;
use kgraph_parser::Chunker;
use kgraph_vector::{create_embedding_client, EmbeddingClient};
use serde::{Deserialize, Serialize};

use crate::index::{IndexBuilder, KnowledgeIndex};
use crate::llm::create_llm_client;
use crate::query::{QueryEngine, QueryResponse};

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_skipped: usize,
    /// Ids of chunks whose extraction failed
    pub failed_chunks: Vec<String>,
    pub triplets_extracted: usize,
    /// Node count after the upsert
    pub nodes: usize,
    /// Edge count after the upsert
    pub edges: usize,
    pub generation: u64,
}

/// Outcome of [`KnowledgeGraphPipeline::create_knowledge_graph`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraphReport {
    pub ingestion: IngestionReport,
    pub answer: String,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Current size of the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub backend: String,
    pub nodes: usize,
    pub edges: usize,
    pub generation: u64,
}

impl GraphStats {
    /// Read counts straight from the store; no model client involved
    pub async fn of(store: &KnowledgeGraphStore) -> Result<Self> {
        Ok(Self {
            backend: store.backend_name().to_string(),
            nodes: store.count_nodes().await?,
            edges: store.count_edges().await?,
            generation: store.generation(),
        })
    }
}

/// End-to-end knowledge graph workflow
pub struct KnowledgeGraphPipeline {
    config: AppConfig,
    store: Arc<KnowledgeGraphStore>,
    chunker: Chunker,
    extractor: TripletExtractor,
    builder: Arc<IndexBuilder>,
    engine: QueryEngine,
}

impl KnowledgeGraphPipeline {
    /// Assemble a pipeline from explicit collaborators
    pub fn new(
        config: AppConfig,
        store: Arc<KnowledgeGraphStore>,
        llm: Arc<dyn LlmClient>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
    ) -> Self {
        let chunker = Chunker::new(&config.chunking);
        let extractor = TripletExtractor::new(Arc::clone(&llm), config.extraction.clone());
        let builder = Arc::new(IndexBuilder::new(embedder));
        let engine = QueryEngine::new(
            Arc::clone(&store),
            llm,
            Arc::clone(&builder),
            config.query.clone(),
        );

        Self {
            config,
            store,
            chunker,
            extractor,
            builder,
            engine,
        }
    }

    /// Validate the config, connect the store and create model clients.
    ///
    /// Fails before touching the store if the config is invalid.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(KnowledgeGraphStore::from_config(&config.graph).await?);
        Self::with_store(config, store)
    }

    /// Validate the config and create model clients over an open store
    pub fn with_store(config: AppConfig, store: Arc<KnowledgeGraphStore>) -> Result<Self> {
        config.validate()?;

        let llm = create_llm_client(&config.llm)?;
        let embedder: Option<Arc<dyn EmbeddingClient>> =
            create_embedding_client(&config.llm)?.map(Arc::from);

        tracing::info!(
            backend = store.backend_name(),
            model = llm.model_name(),
            embeddings = embedder.is_some(),
            "Pipeline ready"
        );
        Ok(Self::new(config, store, llm, embedder))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<KnowledgeGraphStore> {
        &self.store
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Delete every node and edge
    pub async fn reset(&self) -> Result<()> {
        self.store.clear().await?;
        self.builder.clear_chunks().await;
        tracing::info!("Graph cleared");
        Ok(())
    }

    /// Ingest raw text as a new document
    pub async fn ingest_text(&self, text: &str) -> Result<IngestionReport> {
        self.ingest(&Document::new(text)).await
    }

    /// Chunk, extract and upsert one document.
    ///
    /// Chunks are extracted concurrently; the document's triplets are
    /// written in one batch.
    pub async fn ingest(&self, document: &Document) -> Result<IngestionReport> {
        let start = Instant::now();
        let chunks = self.chunker.chunk(document);
        if self.config.query.include_text {
            self.builder.record_chunks(&chunks).await;
        }

        let concurrency = self.config.extraction.concurrency.max(1);
        let results: Vec<(String, Result<Vec<Triplet>>)> = stream::iter(chunks.iter())
            .map(|chunk| async move {
                (chunk.id.clone(), self.extractor.extract_chunk(chunk).await)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut report = IngestionReport {
            chunks_total: chunks.len(),
            ..Default::default()
        };
        let mut triplets = Vec::new();

        for (chunk_id, result) in results {
            match result {
                Ok(extracted) => {
                    report.chunks_succeeded += 1;
                    triplets.extend(extracted);
                }
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk_id, error = %e, "Skipping chunk");
                    report.chunks_skipped += 1;
                    report.failed_chunks.push(chunk_id);
                }
            }
        }
        report.triplets_extracted = triplets.len();

        let upsert = self.store.upsert(&triplets).await?;
        report.generation = upsert.generation;
        report.nodes = self.store.count_nodes().await?;
        report.edges = self.store.count_edges().await?;

        tracing::info!(
            document_id = %document.id(),
            chunks = report.chunks_total,
            succeeded = report.chunks_succeeded,
            skipped = report.chunks_skipped,
            triplets = report.triplets_extracted,
            nodes = report.nodes,
            edges = report.edges,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ingestion complete"
        );
        Ok(report)
    }

    /// Build (or reuse) the index for the current generation
    pub async fn build_index(&self) -> Result<Arc<KnowledgeIndex>> {
        self.engine.refresh_index().await
    }

    pub async fn query(&self, question: &str) -> Result<String> {
        self.engine.query(question).await
    }

    pub async fn query_detailed(&self, question: &str) -> Result<QueryResponse> {
        self.engine.query_detailed(question).await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        GraphStats::of(&self.store).await
    }

    pub async fn export(&self) -> Result<GraphSnapshot> {
        self.store.export().await
    }

    pub async fn persist(&self, dir: &Path) -> Result<PathBuf> {
        self.store.persist(dir).await
    }

    pub async fn load(&self, dir: &Path) -> Result<GraphSnapshot> {
        self.store.load(dir).await
    }

    /// Clear, ingest `text`, index, and answer the default question
    pub async fn create_knowledge_graph(&self, text: &str) -> Result<KnowledgeGraphReport> {
        let question = self.config.query.default_question.clone();
        self.create_knowledge_graph_with_question(text, &question)
            .await
    }

    /// Clear, ingest `text`, persist if configured, index, then answer `question`
    pub async fn create_knowledge_graph_with_question(
        &self,
        text: &str,
        question: &str,
    ) -> Result<KnowledgeGraphReport> {
        self.reset().await?;
        let ingestion = self.ingest_text(text).await?;

        if ingestion.chunks_skipped > 0 {
            tracing::warn!(
                succeeded = ingestion.chunks_succeeded,
                skipped = ingestion.chunks_skipped,
                "Some chunks were skipped"
            );
        }

        if let Some(dir) = &self.config.graph.persist_dir {
            let path = self.store.persist(dir).await?;
            tracing::info!(path = %path.display(), "Graph persisted");
        }

        self.build_index().await?;
        let answer = self.query(question).await?;

        Ok(KnowledgeGraphReport {
            node_count: ingestion.nodes,
            edge_count: ingestion.edges,
            ingestion,
            answer,
        })
    }
}
