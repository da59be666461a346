use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex as TokioMutex;
use tracing_subscriber::EnvFilter;

use lorebase::config::Config;
use lorebase::db::Db;
use lorebase::embedder::{self, Embedder};
use lorebase::indexer::Indexer;
use lorebase::mcp::server::{McpContext, McpServer};
use lorebase::search::SearchEngine;
use lorebase::source::FsTreeSource;
use lorebase::vector::{self, VectorIndex};

#[derive(Parser)]
#[command(
    name = "lorebase",
    version,
    about = "Local markdown knowledge base with semantic search"
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "lorebase.json")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport)
    Serve,
    /// Full rebuild of the search index
    Rebuild,
    /// Incremental update of the search index
    Update,
    /// Semantic search from the command line
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Print a document's full text by path
    Fetch { path: String },
    /// Show index statistics and backend health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(&cli.config)?;
    config.validate()?;
    config.ensure_db_dir()?;
    let config = Arc::new(config);

    let db = Db::open(&config.db_path).context("Failed to open database")?;
    let index: Arc<dyn VectorIndex> =
        vector::create(config.vector_backend, config.model.dimensions).into();
    if !matches!(cli.command, Command::Rebuild) {
        // A rebuild resets vector storage itself before re-creating it.
        db.ensure_vector_schema(index.as_ref())?;
    }
    let db = Arc::new(TokioMutex::new(db));

    let embedder: Arc<dyn Embedder> =
        Arc::new(embedder::create(&config.model.name, config.model.dimensions)?);

    let indexer = Arc::new(Indexer::new(
        db.clone(),
        index.clone(),
        embedder.clone(),
        &config,
    ));
    let search = Arc::new(SearchEngine::new(
        db.clone(),
        index.clone(),
        embedder,
        &config,
    ));

    match cli.command {
        Command::Serve => {
            let ctx = McpContext {
                db,
                config: config.clone(),
                index,
                indexer,
                search,
            };
            McpServer::new(ctx).start().await?;
        }
        Command::Rebuild => {
            cancel_on_ctrl_c(&indexer);
            let source = FsTreeSource::new(config.repos.clone());
            let summary = indexer.rebuild(&source).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Update => {
            cancel_on_ctrl_c(&indexer);
            let source = FsTreeSource::new(config.repos.clone());
            let summary = indexer.update(&source).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Search {
            query,
            limit,
            threshold,
        } => {
            let hits = search
                .search(&query, limit.unwrap_or(config.search_limit), threshold)
                .await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Command::Fetch { path } => {
            let fetched = search.fetch_document(&path).await?;
            println!("{}", fetched.document.content);
        }
        Command::Status => {
            let db = db.lock().await;
            let stats = db.stats(index.as_ref())?;
            let integrity = db.check_integrity(index.as_ref())?;
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "vector_backend": config.vector_backend.as_str(),
                "database": stats,
                "integrity": integrity,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Cancel the indexing run on ctrl-c; the in-flight document transaction
/// completes or rolls back, never half-commits.
fn cancel_on_ctrl_c(indexer: &Indexer) {
    let cancel = indexer.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the in-flight document");
            cancel.cancel();
        }
    });
}
