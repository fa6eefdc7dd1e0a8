//! kgraph Configuration Management
//!
//! Handles configuration from environment variables (including a `.env`
//! file) and TOML config files, with sensible defaults for development.
//! The resulting [`AppConfig`] is passed explicitly to every component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Graph store connection
    pub graph: GraphConfig,

    /// Triplet extraction policy
    pub extraction: ExtractionConfig,

    /// Query engine configuration
    pub query: QueryConfig,

    /// Document chunking
    pub chunking: ChunkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration: optional TOML file, then `.env`, then environment
    /// variables (env takes precedence), then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env file is not an error
        let _ = dotenvy::dotenv();

        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let config = config.with_env_override()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // LLM
        if let Some(provider) = env_parse::<LlmProvider>("LLM_PROVIDER")? {
            self.llm.provider = provider;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.llm.ollama_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.llm.embedding_model = Some(model);
        }
        if let Some(temperature) = env_parse::<f32>("LLM_TEMPERATURE")? {
            self.llm.temperature = temperature;
        }
        if let Some(timeout) = env_parse::<u64>("LLM_TIMEOUT_SECS")? {
            self.llm.timeout_secs = timeout;
        }

        // Graph store
        if let Some(backend) = env_parse::<GraphBackend>("GRAPH_BACKEND")? {
            self.graph.backend = backend;
        }
        if let Ok(uri) = std::env::var("GRAPH_URI") {
            self.graph.uri = uri;
        }
        if let Ok(user) = std::env::var("GRAPH_USER") {
            self.graph.user = user;
        }
        if let Ok(pass) = std::env::var("GRAPH_PASSWORD") {
            self.graph.password = Some(pass);
        }
        if let Ok(ns) = std::env::var("GRAPH_NAMESPACE") {
            self.graph.namespace = ns;
        }
        if let Ok(db) = std::env::var("GRAPH_DATABASE") {
            self.graph.database = db;
        }
        if let Ok(dir) = std::env::var("GRAPH_PERSIST_DIR") {
            self.graph.persist_dir = Some(PathBuf::from(dir));
        }

        // Extraction / query
        if let Some(max) = env_parse::<usize>("MAX_TRIPLETS_PER_CHUNK")? {
            self.extraction.max_triplets_per_chunk = max;
        }
        if let Some(mode) = env_parse::<ResponseMode>("RESPONSE_MODE")? {
            self.query.response_mode = mode;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Check the configuration before anything touches the graph store
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_graph()?;

        if self.llm.provider.requires_api_key()
            && self.llm.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingRequired("OPENAI_API_KEY".to_string()));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "LLM_TEMPERATURE".to_string(),
                value: self.llm.temperature.to_string(),
            });
        }

        if self.extraction.max_triplets_per_chunk == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_TRIPLETS_PER_CHUNK".to_string(),
                value: "0".to_string(),
            });
        }

        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunking.chunk_size".to_string(),
                value: "0".to_string(),
            });
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(ConfigError::InvalidValue {
                key: "chunking.chunk_overlap".to_string(),
                value: self.chunking.chunk_overlap.to_string(),
            });
        }

        Ok(())
    }

    /// Check only the graph store settings. Enough for commands that read
    /// or reset the graph without calling a model.
    pub fn validate_graph(&self) -> Result<(), ConfigError> {
        if self.graph.backend == GraphBackend::SurrealDb {
            if self.graph.uri.is_empty() {
                return Err(ConfigError::MissingRequired("GRAPH_URI".to_string()));
            }
            if self.graph.user.is_empty() || self.graph.password.is_none() {
                return Err(ConfigError::MissingRequired(
                    "GRAPH_USER / GRAPH_PASSWORD".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Parse an optional environment variable
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// API key for hosted providers
    pub api_key: Option<String>,

    /// API base URL (for Azure or compatible APIs)
    pub base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Embedding model name; node embeddings are skipped when unset
    pub embedding_model: Option<String>,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: None,
            base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            embedding_model: None,
            max_tokens: 1024,
            temperature: 0.1,
            timeout_secs: 60,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
    Azure,
}

impl LlmProvider {
    /// Hosted providers need credentials
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI | Self::Azure)
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "azure" => Ok(Self::Azure),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Graph store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    /// In-process store (persist to disk for durability)
    Memory,
    /// Remote SurrealDB over WebSocket
    SurrealDb,
}

impl FromStr for GraphBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "surrealdb" | "surreal" => Ok(Self::SurrealDb),
            _ => Err(ConfigError::InvalidValue {
                key: "GRAPH_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Graph store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Which backend to use
    pub backend: GraphBackend,

    /// Store URI (WebSocket URL for SurrealDB)
    pub uri: String,

    /// Username
    pub user: String,

    /// Password
    pub password: Option<String>,

    /// Namespace
    pub namespace: String,

    /// Database name
    pub database: String,

    /// Directory for `persist` / `load` snapshots
    pub persist_dir: Option<PathBuf>,

    /// Attempts for a failed batch write before the run fails
    pub store_max_retries: u32,

    /// Initial backoff between store retries
    pub retry_backoff_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::Memory,
            uri: "ws://localhost:8000".to_string(),
            user: "root".to_string(),
            password: None,
            namespace: "kgraph".to_string(),
            database: "knowledge".to_string(),
            persist_dir: None,
            store_max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

/// Triplet extraction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Hard cap on triplets kept per chunk
    pub max_triplets_per_chunk: usize,

    /// Retries for a retryable model failure
    pub max_retries: u32,

    /// Initial backoff between retries
    pub retry_backoff_ms: u64,

    /// Chunks extracted concurrently
    pub concurrency: usize,

    /// Longest accepted subject/object
    pub max_entity_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_triplets_per_chunk: 20,
            max_retries: 2,
            retry_backoff_ms: 500,
            concurrency: 4,
            max_entity_chars: 128,
        }
    }
}

/// How retrieved context becomes an answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Recursive divide-and-conquer summarization
    #[default]
    TreeSummarize,
    /// Truncate to one prompt, single call
    SimpleSummarize,
    /// Sequentially refine an answer over each partition
    Refine,
    /// Return the retrieved context without calling the model
    NoText,
}

impl FromStr for ResponseMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tree_summarize" => Ok(Self::TreeSummarize),
            "simple_summarize" | "compact" => Ok(Self::SimpleSummarize),
            "refine" => Ok(Self::Refine),
            "no_text" => Ok(Self::NoText),
            _ => Err(ConfigError::InvalidValue {
                key: "RESPONSE_MODE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TreeSummarize => write!(f, "tree_summarize"),
            Self::SimpleSummarize => write!(f, "simple_summarize"),
            Self::Refine => write!(f, "refine"),
            Self::NoText => write!(f, "no_text"),
        }
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Synthesis strategy
    pub response_mode: ResponseMode,

    /// Pass source chunk text alongside triplets
    pub include_text: bool,

    /// Traversal depth from seed nodes
    pub max_hops: usize,

    /// Maximum seed nodes per query
    pub max_seeds: usize,

    /// Maximum triplets serialized into the context
    pub max_triplets_in_context: usize,

    /// Character budget for a single model prompt
    pub max_prompt_chars: usize,

    /// Partitions summarized concurrently
    pub summary_concurrency: usize,

    /// Ask the model for question keywords before matching
    pub use_llm_keywords: bool,

    /// Nodes taken from embedding similarity
    pub similarity_top_k: usize,

    /// Minimum cosine similarity for an embedding seed
    pub min_similarity: f32,

    /// Query cache TTL (0 disables the cache)
    pub cache_ttl_seconds: u64,

    /// Query cache capacity
    pub cache_max_capacity: u64,

    /// Question asked at the end of `create_knowledge_graph`
    pub default_question: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            response_mode: ResponseMode::TreeSummarize,
            include_text: false,
            max_hops: 2,
            max_seeds: 10,
            max_triplets_in_context: 200,
            max_prompt_chars: 4000,
            summary_concurrency: 4,
            use_llm_keywords: false,
            similarity_top_k: 5,
            min_similarity: 0.75,
            cache_ttl_seconds: 300,
            cache_max_capacity: 1_000,
            default_question: "Summarize the key points of the text".to_string(),
        }
    }
}

/// Unit in which chunk sizes are measured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Chars,
    Words,
}

/// Configuration for document chunking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Maximum chunk size in `unit`s
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in `unit`s
    pub chunk_overlap: usize,

    /// Measurement unit
    pub unit: ChunkUnit,

    /// Prefer to break at sentence or paragraph ends
    pub respect_sentences: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 20,
            unit: ChunkUnit::Chars,
            respect_sentences: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", .path.display())]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-test".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.extraction.max_triplets_per_chunk, 20);
        assert_eq!(config.query.response_mode, ResponseMode::TreeSummarize);
        assert!(!config.query.include_text);
        assert_eq!(config.graph.backend, GraphBackend::Memory);
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!(
            "openai".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert_eq!(
            "ollama".parse::<LlmProvider>().unwrap(),
            LlmProvider::Ollama
        );
        assert!("invalid".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_response_mode_parse() {
        assert_eq!(
            "tree_summarize".parse::<ResponseMode>().unwrap(),
            ResponseMode::TreeSummarize
        );
        assert_eq!(
            "compact".parse::<ResponseMode>().unwrap(),
            ResponseMode::SimpleSummarize
        );
        assert!("accumulate".parse::<ResponseMode>().is_err());
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_ollama_needs_no_key() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Ollama;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_remote_graph_credentials() {
        let mut config = valid_config();
        config.graph.backend = GraphBackend::SurrealDb;
        assert!(config.validate().is_err());

        config.graph.password = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_graph_ignores_model_settings() {
        let mut config = AppConfig::default();
        assert!(config.llm.api_key.is_none());
        assert!(config.validate_graph().is_ok());

        config.graph.backend = GraphBackend::SurrealDb;
        assert!(matches!(
            config.validate_graph(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_chunking() {
        let mut config = valid_config();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.extraction.max_triplets_per_chunk = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[llm]
model = "gpt-4o-mini"
temperature = 0.2

[extraction]
max_triplets_per_chunk = 10

[query]
response_mode = "refine"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.extraction.max_triplets_per_chunk, 10);
        assert_eq!(config.query.response_mode, ResponseMode::Refine);
        // untouched sections keep defaults
        assert_eq!(config.chunking.chunk_size, 1024);
    }
}
