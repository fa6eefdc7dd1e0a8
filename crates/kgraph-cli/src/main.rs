//! kgraph CLI - Build and query knowledge graphs from text
//!
//! Usage:
//!   kgraph build <file> [--question <q>]
//!   kgraph query <question>
//!   kgraph stats | clear
//!   kgraph export [--format json|dot] [--output <path>]
//!   kgraph persist <dir> | load <dir>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use kgraph_core::{AppConfig, GraphBackend, LoggingConfig};
use kgraph_graph::{export, KnowledgeGraphStore, SNAPSHOT_FILE};
use kgraph_rag::{GraphStats, KnowledgeGraphPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kgraph")]
#[command(about = "Knowledge graph construction and question answering")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables take precedence)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clear the graph, ingest a text file, and answer a question
    Build {
        /// Text or markdown file to ingest
        file: PathBuf,

        /// Question to ask once the graph is built
        #[arg(long)]
        question: Option<String>,
    },
    /// Ask a question against the existing graph
    Query {
        /// Question to ask
        question: String,

        /// Print the retrieved triplets as well
        #[arg(long)]
        verbose: bool,
    },
    /// Show node and edge counts
    Stats,
    /// Delete every node and edge
    Clear,
    /// Export the graph for visualization
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a graph snapshot to a directory
    Persist { dir: PathBuf },
    /// Replace the graph with a snapshot from a directory
    Load { dir: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Dot,
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Directory the in-memory graph is saved to between runs
fn local_snapshot_dir(config: &AppConfig) -> Option<&Path> {
    match config.graph.backend {
        GraphBackend::Memory => config.graph.persist_dir.as_deref(),
        GraphBackend::SurrealDb => None,
    }
}

async fn save_local(config: &AppConfig, store: &KnowledgeGraphStore) -> anyhow::Result<()> {
    if let Some(dir) = local_snapshot_dir(config) {
        store.persist(dir).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("invalid configuration")?;
    init_tracing(&config.logging);

    // Model settings are checked only by the commands that call a model
    config
        .validate_graph()
        .context("invalid graph configuration")?;
    let store = Arc::new(KnowledgeGraphStore::from_config(&config.graph).await?);

    if let Some(dir) = local_snapshot_dir(&config) {
        if dir.join(SNAPSHOT_FILE).exists() {
            store.load(dir).await?;
        }
    }

    match cli.command {
        Commands::Build { file, question } => {
            let document = kgraph_parser::load_document(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let question = question.unwrap_or_else(|| config.query.default_question.clone());

            let pipeline = KnowledgeGraphPipeline::with_store(config, store)?;
            let report = pipeline
                .create_knowledge_graph_with_question(document.text(), &question)
                .await?;
            let ingestion = &report.ingestion;

            println!(
                "Chunks: {} succeeded, {} skipped of {}",
                ingestion.chunks_succeeded, ingestion.chunks_skipped, ingestion.chunks_total
            );
            for chunk_id in &ingestion.failed_chunks {
                println!("  skipped {chunk_id}");
            }
            println!("Triplets extracted: {}", ingestion.triplets_extracted);
            println!("Nodes: {}", report.node_count);
            println!("Edges: {}", report.edge_count);
            println!();
            println!("Q: {question}");
            println!("A: {}", report.answer);
        }
        Commands::Query { question, verbose } => {
            let pipeline = KnowledgeGraphPipeline::with_store(config, store)?;
            let response = pipeline.query_detailed(&question).await?;
            if verbose {
                println!("Seeds: {}", response.seeds.join(", "));
                for triplet in &response.triplets {
                    println!("  {triplet}");
                }
                println!();
            }
            println!("{}", response.answer);
        }
        Commands::Stats => {
            let stats = GraphStats::of(&store).await?;
            println!("Backend: {}", stats.backend);
            println!("Nodes: {}", stats.nodes);
            println!("Edges: {}", stats.edges);
        }
        Commands::Clear => {
            store.clear().await?;
            save_local(&config, &store).await?;
            println!("Graph cleared");
        }
        Commands::Export { format, output } => {
            let snapshot = store.export().await?;
            let rendered = match format {
                ExportFormat::Json => export::to_json(&snapshot)?,
                ExportFormat::Dot => export::to_dot(&snapshot),
            };

            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Graph exported");
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Persist { dir } => {
            let path = store.persist(&dir).await?;
            println!("Snapshot written to {}", path.display());
        }
        Commands::Load { dir } => {
            let snapshot = store.load(&dir).await?;
            save_local(&config, &store).await?;
            println!(
                "Loaded {} nodes and {} edges",
                snapshot.node_count(),
                snapshot.edge_count()
            );
        }
    }

    Ok(())
}
