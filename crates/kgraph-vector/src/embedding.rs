//! Embedding client for generating vector representations
//!
//! Supports OpenAI and Ollama embedding APIs, plus a deterministic hashing
//! embedder for offline runs.

use async_trait::async_trait;
use kgraph_core::{KgError, LlmConfig, LlmFailure, LlmProvider, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http::{error_from_response, http_client, transport_error, OPENAI_BASE_URL};
use crate::normalize;

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model,
            dimension,
        }
    }

    /// Point at an OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig, model: &str) -> Result<Self> {
        let api_key = config.api_key.as_ref().ok_or_else(|| {
            KgError::Config(kgraph_core::ConfigError::MissingRequired(
                "OPENAI_API_KEY".to_string(),
            ))
        })?;

        let mut client = Self::new(api_key.clone(), model);
        client.client = http_client(config.timeout_secs);
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Ok(client)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results.into_iter().next().ok_or_else(|| {
            KgError::llm(LlmFailure::InvalidResponse, "No embedding returned")
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("Embedding request failed", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("OpenAI embedding error", response).await);
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            KgError::llm(
                LlmFailure::InvalidResponse,
                format!("Failed to parse embedding response: {e}"),
            )
        })?;

        // Sort by index and extract embeddings
        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);
        tracing::debug!(model = %self.model, count = embeddings.len(), "Embedded batch");

        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768,
        };

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig, model: &str) -> Self {
        let mut client = Self::new(config.ollama_url.clone(), model);
        client.client = http_client(config.timeout_secs);
        client
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("Ollama embedding request failed", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("Ollama embedding error", response).await);
        }

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            KgError::llm(
                LlmFailure::InvalidResponse,
                format!("Failed to parse embedding response: {e}"),
            )
        })?;

        Ok(result.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Ollama has no batch endpoint
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Hashing Embedder
// ============================================================================

/// Deterministic bag-of-tokens embedding for offline use and tests
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dim: usize,
}

impl HashEmbedding {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vec = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dim;
            vec[idx] += 1.0;
        }

        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config.
///
/// Returns `None` when no embedding model is configured. The model name
/// `hash` selects the offline [`HashEmbedding`].
pub fn create_embedding_client(config: &LlmConfig) -> Result<Option<Box<dyn EmbeddingClient>>> {
    let Some(model) = config.embedding_model.as_deref() else {
        return Ok(None);
    };

    if model == "hash" {
        return Ok(Some(Box::new(HashEmbedding::new(256))));
    }

    tracing::debug!(provider = ?config.provider, model, "Creating embedding client");
    let client: Box<dyn EmbeddingClient> = match config.provider {
        LlmProvider::OpenAI | LlmProvider::Azure => {
            Box::new(OpenAiEmbedding::from_config(config, model)?)
        }
        LlmProvider::Ollama => Box::new(OllamaEmbedding::from_config(config, model)),
    };
    Ok(Some(client))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_dimension() {
        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-small");
        assert_eq!(client.dimension(), 1536);

        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-large");
        assert_eq!(client.dimension(), 3072);
    }

    #[test]
    fn test_ollama_dimension() {
        let client = OllamaEmbedding::new("http://localhost:11434/", "nomic-embed-text");
        assert_eq!(client.dimension(), 768);
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_hash_embedding_is_deterministic() {
        let embedder = HashEmbedding::new(64);
        let a = embedder.embed("Blackberry Torch").await.unwrap();
        let b = embedder.embed("blackberry torch").await.unwrap();
        let c = embedder.embed("AT&T store").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_factory_without_model() {
        let config = LlmConfig::default();
        assert!(create_embedding_client(&config).unwrap().is_none());
    }

    #[test]
    fn test_factory_requires_key_for_openai() {
        let config = LlmConfig {
            embedding_model: Some("text-embedding-3-small".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            create_embedding_client(&config),
            Err(KgError::Config(_))
        ));
    }

    #[test]
    fn test_factory_hash_model() {
        let config = LlmConfig {
            embedding_model: Some("hash".to_string()),
            ..Default::default()
        };
        let client = create_embedding_client(&config).unwrap().unwrap();
        assert_eq!(client.dimension(), 256);
    }
}
