use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ingest_core::{EngineConfig, IngestionService, JobInputs, SqliteJobStore};
use kb_ingest::adapters::{FileSystemLoader, FixedSizeChunker, JsonlIndexer, NullEmbedder};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kb-ingest")]
#[command(version, about = "Knowledge base ingestion daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh ingestion job for a knowledge base.
    Start {
        kb_id: String,
        /// Directory of source documents to ingest.
        source_dir: PathBuf,
        #[arg(long, default_value = "filesystem")]
        source_type: String,
    },
    /// Resume a paused job for a knowledge base.
    Resume {
        kb_id: String,
        source_dir: PathBuf,
    },
    /// Pause a running job.
    Pause { kb_id: String },
    /// Cancel a job and discard its partial index.
    Cancel { kb_id: String },
    /// Print the composed status of a knowledge base's latest job.
    Status { kb_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    if let Some(parent) = config.store_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create store directory")?;
    }
    let store = Arc::new(SqliteJobStore::new(&config.store_path)?);

    let recovered = store.recover_inflight_jobs()?;
    for job_id in &recovered {
        warn!(%job_id, "recovered an in-flight job as failed after an abnormal termination");
    }

    match cli.command {
        Commands::Start {
            kb_id,
            source_dir,
            source_type,
        } => run_start(&config, store, &kb_id, &source_type, &source_dir).await,
        Commands::Resume { kb_id, source_dir } => {
            run_resume(&config, store, &kb_id, &source_dir).await
        }
        Commands::Pause { kb_id } => run_pause(&config, store, &kb_id).await,
        Commands::Cancel { kb_id } => run_cancel(&config, store, &kb_id).await,
        Commands::Status { kb_id } => run_status(&config, store, &kb_id).await,
    }
}

async fn build_service_and_inputs(
    config: &EngineConfig,
    store: Arc<SqliteJobStore>,
    kb_id: &str,
    source_dir: &std::path::Path,
) -> Result<(IngestionService, JobInputs)> {
    let index_dir = ingest_core::storage::index_dir(&config.content_root, kb_id);
    let indexer: Arc<dyn ingest_core::Indexer> =
        Arc::new(JsonlIndexer::open(&index_dir, kb_id).await?);
    let service = IngestionService::new(store, indexer);

    let loader = FileSystemLoader::new(source_dir, config.batch_size, None)
        .context("failed to open source directory")?;
    let inputs = JobInputs {
        content_root: config.content_root.clone(),
        loader: Box::new(loader),
        chunker: Arc::new(FixedSizeChunker { chunk_chars: 1000 }),
        embedder: Arc::new(NullEmbedder { dims: 16 }),
    };
    Ok((service, inputs))
}

async fn run_start(
    config: &EngineConfig,
    store: Arc<SqliteJobStore>,
    kb_id: &str,
    source_type: &str,
    source_dir: &std::path::Path,
) -> Result<()> {
    let (service, inputs) = build_service_and_inputs(config, store, kb_id, source_dir).await?;
    let job_id = service
        .start(
            kb_id,
            source_type,
            serde_json::json!({ "source_dir": source_dir }),
            0,
            inputs,
        )
        .await?;
    info!(%job_id, kb_id, "started ingestion job");
    wait_for_signal_or_terminal(&service, kb_id).await
}

async fn run_resume(
    config: &EngineConfig,
    store: Arc<SqliteJobStore>,
    kb_id: &str,
    source_dir: &std::path::Path,
) -> Result<()> {
    let (service, inputs) = build_service_and_inputs(config, store, kb_id, source_dir).await?;
    let job_id = service.resume(kb_id, inputs).await?;
    info!(%job_id, kb_id, "resumed ingestion job");
    wait_for_signal_or_terminal(&service, kb_id).await
}

async fn run_pause(config: &EngineConfig, store: Arc<SqliteJobStore>, kb_id: &str) -> Result<()> {
    let index_dir = ingest_core::storage::index_dir(&config.content_root, kb_id);
    let indexer: Arc<dyn ingest_core::Indexer> =
        Arc::new(JsonlIndexer::open(&index_dir, kb_id).await?);
    let service = IngestionService::new(store, indexer);
    service.pause(kb_id).await?;
    println!("paused {kb_id}");
    Ok(())
}

async fn run_cancel(config: &EngineConfig, store: Arc<SqliteJobStore>, kb_id: &str) -> Result<()> {
    let index_dir = ingest_core::storage::index_dir(&config.content_root, kb_id);
    let indexer: Arc<dyn ingest_core::Indexer> =
        Arc::new(JsonlIndexer::open(&index_dir, kb_id).await?);
    let service = IngestionService::new(store, indexer);
    service.cancel(kb_id).await?;
    println!("canceled {kb_id}");
    Ok(())
}

async fn run_status(config: &EngineConfig, store: Arc<SqliteJobStore>, kb_id: &str) -> Result<()> {
    let index_dir = ingest_core::storage::index_dir(&config.content_root, kb_id);
    let indexer: Arc<dyn ingest_core::Indexer> =
        Arc::new(JsonlIndexer::open(&index_dir, kb_id).await?);
    let service = IngestionService::new(store, indexer);
    let status = service.status(kb_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Blocks until Ctrl-C (triggering a graceful shutdown of every job) or the
/// named job reaches a terminal/paused status, printing the final status.
async fn wait_for_signal_or_terminal(service: &IngestionService, kb_id: &str) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, requesting graceful shutdown");
                service.request_shutdown_all();
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        let status = service.status(kb_id).await?;
        if matches!(
            status.status,
            ingest_common::JobStatus::Completed
                | ingest_common::JobStatus::Failed
                | ingest_common::JobStatus::Canceled
                | ingest_common::JobStatus::Paused
        ) {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }
    }
}
