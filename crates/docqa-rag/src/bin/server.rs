//! Document Q&A server binary
//!
//! Run with: cargo run -p docqa-rag --bin docqa-server -- --corpus ./pdfs

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docqa_rag::{config::RagConfig, pipeline::RagPipeline, server::RagServer};

#[derive(Parser, Debug)]
#[command(name = "docqa-server", version, about = "Conversational document Q&A over a local corpus")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Corpus directory (overrides config and DOCQA_CORPUS_DIR)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Index snapshot directory (overrides config and DOCQA_INDEX_PATH)
    #[arg(long)]
    index: Option<PathBuf>,

    /// Ignore an existing snapshot and rebuild from the corpus
    #[arg(long)]
    rebuild: bool,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docqa_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = RagConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(corpus) = args.corpus {
        config.corpus.dir = corpus;
    }
    if let Some(index) = args.index {
        config.index.path = index;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("  - Corpus: {}", config.corpus.dir.display());
    tracing::info!("  - Index: {}", config.index.path.display());
    tracing::info!("  - Embedding model: {} ({:?})", config.embeddings.model, config.embeddings.backend);
    tracing::info!("  - LLM model: {} ({:?})", config.llm.model, config.llm.backend);
    tracing::info!(
        "  - Chunking: {} chars, {} overlap",
        config.chunking.chunk_size,
        config.chunking.chunk_overlap
    );

    let pipeline = RagPipeline::from_config(config)
        .await
        .context("initializing pipeline")?;

    if !pipeline.llm().health_check().await.unwrap_or(false) {
        tracing::warn!(
            "LLM {} ({}) did not pass its health check; answers may fail",
            pipeline.llm().name(),
            pipeline.llm().model()
        );
    }

    let stats = pipeline
        .open_or_build(args.rebuild)
        .await
        .context("preparing the document index")?;
    tracing::info!(
        "Index {} ready: {} chunks from {} files",
        stats.snapshot_id,
        stats.entries,
        stats.files
    );

    let server = RagServer::new(Arc::new(pipeline));
    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
