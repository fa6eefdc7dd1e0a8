//! SurrealDB implementation for graph storage
//!
//! Nodes live in the `node` table keyed by their normalized key; edges are
//! `relates` graph edges carrying a `label`. Each batch is sent as a single
//! transaction so a failed write leaves nothing behind.

use async_trait::async_trait;
use kgraph_core::{Edge, GraphBatch, GraphConfig, GraphSnapshot, KgError, Node, Result};
use serde::{Deserialize, Serialize};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

use crate::GraphStore;

/// SurrealDB graph store implementation
pub struct SurrealDbStore {
    client: Surreal<Client>,
}

impl SurrealDbStore {
    /// Create a new SurrealDB connection
    pub async fn new(config: &GraphConfig) -> Result<Self> {
        // Remove ws:// or wss:// prefix if present (surrealdb crate adds it automatically)
        let url = config
            .uri
            .strip_prefix("ws://")
            .or_else(|| config.uri.strip_prefix("wss://"))
            .unwrap_or(&config.uri);

        let client = Surreal::new::<Ws>(url)
            .await
            .map_err(|e| KgError::Store(format!("SurrealDB connection failed: {e}")))?;

        let password = config.password.as_deref().unwrap_or_default();

        // Authenticate
        client
            .signin(Root {
                username: &config.user,
                password,
            })
            .await
            .map_err(|e| KgError::Store(format!("SurrealDB auth failed: {e}")))?;

        // Select namespace and database
        client
            .use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| KgError::Store(format!("SurrealDB namespace error: {e}")))?;

        tracing::info!(
            namespace = %config.namespace,
            database = %config.database,
            "Connected to SurrealDB"
        );

        Ok(Self { client })
    }

    /// Initialize schema (run once on setup)
    pub async fn init_schema(&self) -> Result<()> {
        self.client
            .query(
                r#"
                DEFINE TABLE IF NOT EXISTS node SCHEMALESS;
                DEFINE INDEX IF NOT EXISTS idx_node_key ON node FIELDS key UNIQUE;
                DEFINE TABLE IF NOT EXISTS relates SCHEMALESS TYPE RELATION FROM node TO node;
                DEFINE INDEX IF NOT EXISTS idx_relates_label ON relates FIELDS label;
            "#,
            )
            .await
            .and_then(|response| response.check())
            .map_err(|e| KgError::Store(format!("Schema init failed: {e}")))?;

        Ok(())
    }

    async fn run_transaction(
        &self,
        batch: &GraphBatch,
        clear_first: bool,
    ) -> std::result::Result<(), surrealdb::Error> {
        let (sql, binds) = batch_statement(batch, clear_first);
        let mut query = self.client.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        query.await?.check()?;
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<usize> {
        let mut response = self
            .client
            .query(format!("SELECT count() AS count FROM {table} GROUP ALL"))
            .await
            .map_err(|e| KgError::Store(format!("Count query failed: {e}")))?;

        let rows: Vec<CountRecord> = response
            .take(0)
            .map_err(|e| KgError::Store(format!("Result extraction failed: {e}")))?;

        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }
}

/// Build the transaction statement and its bindings for a batch. With
/// `clear_first` the existing graph is deleted inside the same transaction.
fn batch_statement(
    batch: &GraphBatch,
    clear_first: bool,
) -> (String, Vec<(String, serde_json::Value)>) {
    let mut sql = String::from("BEGIN TRANSACTION;\n");
    let mut binds = Vec::new();

    if clear_first {
        sql.push_str("DELETE relates;\nDELETE node;\n");
    }

    // First surface form wins for the label; type is filled when absent
    for (i, node) in batch.nodes.iter().enumerate() {
        sql.push_str(&format!(
            "UPSERT type::thing('node', $nk{i}) SET key = $nk{i}, label = label ?? $nl{i}, entity_type = entity_type ?? $nt{i};\n"
        ));
        binds.push((format!("nk{i}"), serde_json::json!(node.key)));
        binds.push((format!("nl{i}"), serde_json::json!(node.label)));
        binds.push((format!("nt{i}"), serde_json::json!(node.entity_type)));
    }

    // Delete-then-relate keeps exactly one edge per (from, to, label)
    for (i, edge) in batch.edges.iter().enumerate() {
        sql.push_str(&format!(
            "LET $ef{i} = type::thing('node', $efk{i});\n\
             LET $et{i} = type::thing('node', $etk{i});\n\
             DELETE relates WHERE in = $ef{i} AND out = $et{i} AND label = $el{i};\n\
             RELATE $ef{i}->relates->$et{i} SET label = $el{i}, source_chunk = $es{i};\n"
        ));
        binds.push((format!("efk{i}"), serde_json::json!(edge.from)));
        binds.push((format!("etk{i}"), serde_json::json!(edge.to)));
        binds.push((format!("el{i}"), serde_json::json!(edge.label)));
        binds.push((format!("es{i}"), serde_json::json!(edge.source_chunk)));
    }

    sql.push_str("COMMIT TRANSACTION;");
    (sql, binds)
}

#[derive(Debug, Deserialize)]
struct CountRecord {
    count: usize,
}

/// Node record for SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRecord {
    key: String,
    label: String,
    entity_type: Option<String>,
}

/// Edge record projected from the `relates` table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRecord {
    source: String,
    target: String,
    label: String,
    source_chunk: Option<String>,
}

impl From<NodeRecord> for Node {
    fn from(r: NodeRecord) -> Self {
        Node {
            key: r.key,
            label: r.label,
            entity_type: r.entity_type,
            embedding: None,
        }
    }
}

impl From<EdgeRecord> for Edge {
    fn from(r: EdgeRecord) -> Self {
        Edge {
            from: r.source,
            to: r.target,
            label: r.label,
            source_chunk: r.source_chunk,
        }
    }
}

#[async_trait]
impl GraphStore for SurrealDbStore {
    async fn clear(&self) -> Result<()> {
        self.client
            .query("DELETE relates; DELETE node;")
            .await
            .and_then(|response| response.check())
            .map_err(|e| KgError::Store(format!("Failed to clear graph: {e}")))?;

        Ok(())
    }

    async fn apply(&self, batch: &GraphBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.run_transaction(batch, false)
            .await
            .map_err(|e| KgError::Store(format!("Failed to apply batch: {e}")))
    }

    async fn replace(&self, batch: &GraphBatch) -> Result<()> {
        self.run_transaction(batch, true)
            .await
            .map_err(|e| KgError::Store(format!("Failed to replace graph: {e}")))
    }

    async fn count_nodes(&self) -> Result<usize> {
        self.count("node").await
    }

    async fn count_edges(&self) -> Result<usize> {
        self.count("relates").await
    }

    async fn export(&self) -> Result<GraphSnapshot> {
        let mut response = self
            .client
            .query("SELECT key, label, entity_type FROM node ORDER BY key")
            .query("SELECT in.key AS source, out.key AS target, label, source_chunk FROM relates")
            .await
            .map_err(|e| KgError::Store(format!("Export query failed: {e}")))?;

        let nodes: Vec<NodeRecord> = response
            .take(0)
            .map_err(|e| KgError::Store(format!("Result extraction failed: {e}")))?;
        let edges: Vec<EdgeRecord> = response
            .take(1)
            .map_err(|e| KgError::Store(format!("Result extraction failed: {e}")))?;

        Ok(GraphSnapshot {
            nodes: nodes.into_iter().map(Node::from).collect(),
            edges: edges.into_iter().map(Edge::from).collect(),
        }
        .sorted())
    }

    fn name(&self) -> &str {
        "surrealdb"
    }
}

// ============================================================================
// Tests
// ============================================================================
