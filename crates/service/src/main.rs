use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use auditrag_rag::{ingest_standards, AppConfig, RagService};
use auditrag_service::{create_router, AppState};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "auditrag", version, about = "ESG document audit assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Overrides BIND_ADDR / bind_addr from the config file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Index the standards directory once and exit
    IngestStandards {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Arc::new(AppConfig::from_env().context("failed to load configuration")?);
    let rag = RagService::from_config(config.clone())?;

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(rag, bind.unwrap_or_else(|| config.bind_addr.clone())).await,
        Command::IngestStandards { dir } => {
            let dir = dir.unwrap_or_else(|| config.standards_dir.clone());
            ingest_once(&rag, dir).await
        }
    }
}

async fn serve(rag: RagService, bind_addr: String) -> Result<()> {
    if let Err(err) = rag.history_store().init() {
        warn!(error = %format!("{err:#}"), "chat history store not ready; history requests will fail");
    }
    info!(backend = rag.index().backend_name(), "vector index selected");
    if rag.index_reachable().await {
        info!("vector index reachable");
    }

    let background = rag.clone();
    tokio::spawn(async move {
        let config = background.config();
        let report = ingest_standards(
            background.index(),
            &config.standards_dir,
            &config.collections.standards,
            &config.retrieval.chunk_config(),
        )
        .await;
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "some standards could not be indexed");
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "listening");
    axum::serve(listener, create_router(Arc::new(AppState { rag }))).await?;
    Ok(())
}

async fn ingest_once(rag: &RagService, dir: PathBuf) -> Result<()> {
    if !rag.index().is_configured() {
        bail!("vector index is not configured; set the embedding key and index backend");
    }
    let config = rag.config();
    let report = ingest_standards(
        rag.index(),
        &dir,
        &config.collections.standards,
        &config.retrieval.chunk_config(),
    )
    .await;
    if report.skipped_existing {
        info!(collection = %config.collections.standards, "collection already present; nothing to do");
        return Ok(());
    }
    for (file, chunks) in &report.indexed {
        info!(file = %file, chunks, "indexed");
    }
    for (file, reason) in &report.failed {
        warn!(file = %file, reason = %reason, "failed");
    }
    info!(
        files = report.indexed.len(),
        chunks = report.total_chunks(),
        "standards ingestion complete"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
