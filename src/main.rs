//! # ArchLens CLI (`archlens`)
//!
//! The `archlens` binary is the primary interface for ArchLens. It provides
//! commands for database initialization, repository ingest, running analysis
//! jobs, semantic search, and starting the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! archlens --config ./config/archlens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `archlens init` | Create the SQLite database and run schema migrations |
//! | `archlens ingest <repo> <root>` | Store a repository source snapshot |
//! | `archlens analyze <repo>` | Run an analysis job and print the result |
//! | `archlens search <repo> "<query>"` | Semantic search over indexed embeddings |
//! | `archlens serve` | Start the JSON HTTP API server |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use archlens::config::{self, Config};
use archlens::db;
use archlens::ingest;
use archlens::inference::create_inference;
use archlens::models::{AnalysisKind, AnalysisRequest};
use archlens::orchestrator::Orchestrator;
use archlens::search_index::SqliteIndex;
use archlens::server;
use archlens::store::{JobStateStore, SqliteStore};

/// ArchLens — an orchestration core for AI-powered repository analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/archlens.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "archlens",
    about = "ArchLens — AI-powered repository analysis orchestration",
    version,
    long_about = "ArchLens runs repository analysis jobs through a staged pipeline \
    (fetch source, compute embeddings, compute insights, persist results) and exposes \
    job status, health scores, and semantic search via a CLI and JSON HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/archlens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (jobs,
    /// sources, embeddings). Idempotent — running it multiple times is safe.
    Init,

    /// Store a repository source snapshot.
    ///
    /// Walks the checkout at `root`, applies the configured include/exclude
    /// globs, and replaces the repository's snapshot. Analysis jobs read
    /// from the snapshot, never from the filesystem.
    Ingest {
        /// Repository identifier used in later `analyze` and `search` calls.
        repository_id: String,

        /// Path to the repository checkout to scan.
        root: PathBuf,
    },

    /// Run an analysis job and wait for it to finish.
    ///
    /// Triggers a job, polls until it reaches a terminal state, and prints
    /// the health dimensions and insights.
    Analyze {
        /// Repository identifier (must have an ingested snapshot).
        repository_id: String,

        /// Branch recorded in the job fingerprint.
        #[arg(long, default_value = "main")]
        branch: String,

        /// Commit reference recorded in the job fingerprint.
        #[arg(long)]
        commit: Option<String>,

        /// Analysis kind: architectural, security, performance, dependency,
        /// or comprehensive.
        #[arg(long, default_value = "comprehensive")]
        kind: String,

        /// Restrict analysis to specific paths (repeatable).
        #[arg(long = "path")]
        paths: Vec<String>,
    },

    /// Semantic search over a repository's indexed embeddings.
    Search {
        /// Repository identifier.
        repository_id: String,

        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Minimum similarity score; results below it are dropped.
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
    },

    /// Start the JSON HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// analysis and embeddings endpoints until interrupted.
    Serve,
}

/// Connect the database and wire up the orchestrator.
async fn build_orchestrator(cfg: &Config) -> anyhow::Result<Arc<Orchestrator>> {
    let pool = db::connect(cfg).await?;
    db::run_migrations(&pool).await?;

    let store = JobStateStore::new(Arc::new(SqliteStore::new(pool.clone())));
    let index = Arc::new(SqliteIndex::new(pool));
    let inference = create_inference(&cfg.inference)?;

    Ok(Orchestrator::new(
        store,
        index,
        inference,
        cfg.pipeline.clone(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("archlens=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            db::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            repository_id,
            root,
        } => {
            let pool = db::connect(&cfg).await?;
            db::run_migrations(&pool).await?;
            let store = SqliteStore::new(pool.clone());
            ingest::run_ingest(&store, &cfg.ingest, &repository_id, &root).await?;
            pool.close().await;
        }
        Commands::Analyze {
            repository_id,
            branch,
            commit,
            kind,
            paths,
        } => {
            let kind: AnalysisKind = match kind.parse() {
                Ok(kind) => kind,
                Err(message) => bail!("{}", message),
            };
            let request = AnalysisRequest {
                repository_id,
                commit_reference: commit,
                branch,
                analysis_kind: kind,
                file_paths: if paths.is_empty() { None } else { Some(paths) },
            };

            let orchestrator = build_orchestrator(&cfg).await?;
            let trigger = orchestrator.trigger(request).await?;
            println!("job {}", trigger.job_id);

            let job = loop {
                let job = orchestrator.get_status(trigger.job_id).await?;
                if job.status.is_terminal() {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            };

            println!("  status: {}", job.status);
            for stage in &job.stages {
                println!(
                    "  {} — {:?} (attempt {})",
                    stage.stage, stage.outcome, stage.attempt_count
                );
            }
            if let Some(result) = &job.result {
                println!("  overall: {:.1}", result.overall);
                for (dimension, score) in &result.dimensions {
                    println!("    {}: {:.1}", dimension, score);
                }
                for insight in &result.insights {
                    println!("  [{:?}] {}", insight.severity, insight.title);
                }
            }
            if let Some(error) = &job.error {
                println!("  error: {}", error.message);
            }
            println!("ok");
        }
        Commands::Search {
            repository_id,
            query,
            top_k,
            threshold,
        } => {
            let orchestrator = build_orchestrator(&cfg).await?;
            let hits = orchestrator
                .semantic_search(&query, &repository_id, top_k, threshold)
                .await?;

            if hits.is_empty() {
                println!("no results");
            }
            for (i, hit) in hits.iter().enumerate() {
                let source = hit.source_id.as_deref().unwrap_or("<unknown>");
                println!("{}. {} (score {:.4})", i + 1, source, hit.score);
            }
        }
        Commands::Serve => {
            let orchestrator = build_orchestrator(&cfg).await?;
            server::run_server(orchestrator, &cfg.server.bind).await?;
        }
    }

    Ok(())
}
