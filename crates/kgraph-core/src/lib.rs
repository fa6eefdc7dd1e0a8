//! kgraph Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout kgraph:
//! - Documents and chunks (the input side of extraction)
//! - Triplets, nodes, and edges (the knowledge graph)
//! - Entity key normalization
//! - Common error types
//! - Shared traits for language-model backends
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, ChunkConfig, ChunkUnit, ConfigError, ExtractionConfig, GraphBackend, GraphConfig,
    LlmConfig, LlmProvider, LoggingConfig, QueryConfig, ResponseMode,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Failure class reported by a language-model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmFailure {
    /// Request exceeded its deadline
    Timeout,
    /// Provider throttled the request
    RateLimited,
    /// Credentials were rejected
    Unauthorized,
    /// Provider unreachable or returned a server error
    Unavailable,
    /// Provider answered with something we could not use
    InvalidResponse,
}

impl LlmFailure {
    /// Classify an unsuccessful HTTP status from a model provider
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            408 => Self::Timeout,
            429 => Self::RateLimited,
            500..=599 => Self::Unavailable,
            _ => Self::InvalidResponse,
        }
    }
}

impl std::fmt::Display for LlmFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// Core error types for kgraph operations
#[derive(Error, Debug)]
pub enum KgError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction failed for chunk {chunk_id}: {message}")]
    Extraction { chunk_id: String, message: String },

    #[error("Graph store error: {0}")]
    Store(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("LLM error ({kind}): {message}")]
    Llm { kind: LlmFailure, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KgError {
    /// Shorthand for a language-model failure
    pub fn llm(kind: LlmFailure, message: impl Into<String>) -> Self {
        Self::Llm {
            kind,
            message: message.into(),
        }
    }

    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Llm { kind, .. } => matches!(
                kind,
                LlmFailure::Timeout | LlmFailure::RateLimited | LlmFailure::Unavailable
            ),
            Self::Store(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, KgError>;

// ============================================================================
// Normalization
// ============================================================================

/// Normalize an entity name into its node key.
///
/// Two surface forms of the same entity ("AT&T", " at&t ") map to the same
/// key: Unicode lowercase, surrounding quotes and punctuation stripped,
/// internal whitespace collapsed to single spaces.
pub fn normalize_key(name: &str) -> String {
    let trimmed = name.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.' | ',' | ';' | ':' | '*')
    });

    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a predicate into an edge label
pub fn normalize_predicate(predicate: &str) -> String {
    normalize_key(predicate)
}

/// Collapse whitespace without changing case (canonical display label)
pub fn canonical_label(name: &str) -> String {
    name.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`'))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Document Models
// ============================================================================

/// Metadata attached to a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Where the text came from (file path, call id, ...)
    pub source: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Additional metadata (custom fields)
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            source: None,
            created_at: Utc::now(),
            extra: HashMap::new(),
        }
    }
}

/// Raw input text. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    id: Uuid,
    text: String,
    metadata: DocumentMetadata,
}

impl Document {
    /// Create a new document
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    /// Set the source identifier
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Add a custom metadata field
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.extra.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }
}

/// A contiguous slice of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier: `{document_id}#{index}`
    pub id: String,

    /// Parent document ID
    pub document_id: Uuid,

    /// Chunk index within the document
    pub index: u32,

    /// Text content (equals `document.text[start..end]`)
    pub text: String,

    /// Starting byte offset in the document
    pub start: usize,

    /// Ending byte offset (exclusive)
    pub end: usize,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(document_id: Uuid, index: u32, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            id: format!("{document_id}#{index}"),
            document_id,
            index,
            text: text.into(),
            start,
            end,
        }
    }

    /// Reference used to trace triplets back to this chunk
    pub fn reference(&self) -> ChunkRef {
        ChunkRef {
            chunk_id: self.id.clone(),
            document_id: self.document_id,
        }
    }
}

/// Reference to the chunk a fact was extracted from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub document_id: Uuid,
}

// ============================================================================
// Knowledge Graph Models
// ============================================================================

/// A (subject, predicate, object) fact extracted from text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,

    /// Extraction confidence (0.0 - 1.0), when the model reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Chunk this triplet came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ChunkRef>,
}

impl Triplet {
    /// Create a triplet, rejecting empty parts
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Result<Self> {
        let subject = canonical_label(&subject.into());
        let predicate = canonical_label(&predicate.into());
        let object = canonical_label(&object.into());

        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return Err(KgError::Validation(format!(
                "triplet parts must be non-empty: ({subject}, {predicate}, {object})"
            )));
        }

        Ok(Self {
            subject,
            predicate,
            object,
            confidence: None,
            source: None,
        })
    }

    /// Set confidence score
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Set source chunk
    pub fn with_source(mut self, source: ChunkRef) -> Self {
        self.source = Some(source);
        self
    }

    /// Normalized identity of this fact: (subject key, label, object key)
    pub fn identity(&self) -> (String, String, String) {
        (
            normalize_key(&self.subject),
            normalize_predicate(&self.predicate),
            normalize_key(&self.object),
        )
    }
}

impl std::fmt::Display for Triplet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// A graph vertex. Identity is the normalized key alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Normalized entity key
    pub key: String,

    /// Canonical label (first surface form seen)
    pub label: String,

    /// Optional entity type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Optional embedding vector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Node {
    /// Create a node from a surface form
    pub fn from_name(name: &str) -> Self {
        Self {
            key: normalize_key(name),
            label: canonical_label(name),
            entity_type: None,
            embedding: None,
        }
    }

    /// Set entity type
    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Merge attributes from another surface form of the same entity.
    ///
    /// The existing label is kept; missing type and embedding are filled.
    pub fn merge(&mut self, other: &Node) {
        debug_assert_eq!(self.key, other.key);
        if self.entity_type.is_none() {
            self.entity_type = other.entity_type.clone();
        }
        if self.embedding.is_none() {
            self.embedding = other.embedding.clone();
        }
    }
}

/// Identity of a stored edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: String,
    pub to: String,
    pub label: String,
}

/// A directed, labelled relation between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Key of the subject node
    pub from: String,

    /// Key of the object node
    pub to: String,

    /// Normalized predicate
    pub label: String,

    /// Chunk the relation was first extracted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk: Option<String>,
}

impl Edge {
    /// Create an edge between two node keys
    pub fn new(from: impl Into<String>, to: impl Into<String>, label: &str) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: normalize_predicate(label),
            source_chunk: None,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from: self.from.clone(),
            to: self.to.clone(),
            label: self.label.clone(),
        }
    }
}

/// A unit of writes applied atomically by a graph store.
///
/// Built by the adapter so that every edge endpoint is present in `nodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphBatch {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphBatch {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Full node and edge sets of a namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges whose endpoints are not both present as nodes
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        let keys: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.key.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !keys.contains(e.from.as_str()) || !keys.contains(e.to.as_str()))
            .collect()
    }

    /// Sort nodes by key and edges by identity
    pub fn sorted(mut self) -> Self {
        self.nodes.sort_by(|a, b| a.key.cmp(&b.key));
        self.edges.sort_by_key(|e| e.key());
        self
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for LLM clients: `infer(prompt) -> text`
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model identifier for logging
    fn model_name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
