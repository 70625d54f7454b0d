//! Recall daemon - background consolidation worker and task administration

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use recall::RecallError;
use recall::config::Config;
use recall::curator::{ConsolidationPipeline, QuestionBook, RemoteCurator};
use recall::embedding::{Embedder, FastEmbedder, ensure_dimension};
use recall::error::Result;
use recall::queue::{TaskFilter, TaskQueue, TaskStatus};
use recall::storage::LanceStore;

/// Recall - long-term memory for LLM agents
#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Long-term memory with background consolidation for LLM agents")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the consolidation workers until interrupted (default command)
    #[command(name = "serve")]
    Serve,

    /// List persisted tasks (run while the server is stopped)
    Tasks {
        /// Only tasks in this status
        #[arg(long)]
        status: Option<String>,
        /// Only tasks with this name
        #[arg(long)]
        name: Option<String>,
        /// Maximum number of tasks to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Enqueue a task with JSON parameters
    Enqueue {
        name: String,
        /// Parameters as a JSON document
        #[arg(default_value = "{}")]
        params: String,
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Cancel a queued or running task
    Cancel { id: Uuid },

    /// Record an open question for an owner
    Ask { owner: String, question: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        None | Some(Command::Serve) => serve(config).await,
        Some(Command::Tasks {
            status,
            name,
            limit,
        }) => list_tasks(config, status, name, limit).await,
        Some(Command::Enqueue {
            name,
            params,
            max_attempts,
        }) => enqueue(config, &name, &params, max_attempts).await,
        Some(Command::Cancel { id }) => cancel(config, id).await,
        Some(Command::Ask { owner, question }) => ask(config, &owner, &question).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,recall=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn open_store(config: &Config) -> Result<Arc<LanceStore>> {
    let data_dir = &config.storage.data_dir;
    tracing::info!("Initializing storage at: {}", data_dir.display());

    std::fs::create_dir_all(data_dir).map_err(|e| {
        RecallError::Storage(format!(
            "Failed to create data directory {}: {}",
            data_dir.display(),
            e
        ))
    })?;

    let store = LanceStore::open(data_dir, config.storage.embedding_dimension).await?;
    Ok(Arc::new(store))
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting Recall daemon");
    tracing::debug!("Config loaded: {:?}", config);

    let store = open_store(&config).await?;
    if let Err(e) = store.create_vector_index().await {
        tracing::warn!("Vector index not created: {e}");
    }

    tracing::info!("Loading embedding model: {}", config.embedding.model);
    let embedder: Arc<dyn Embedder> = Arc::new(FastEmbedder::new(&config.embedding.model)?);
    ensure_dimension(embedder.as_ref(), config.storage.embedding_dimension)?;
    let curator = Arc::new(RemoteCurator::new(&config.curator)?);

    let pipeline = Arc::new(ConsolidationPipeline::new(
        store.clone(),
        embedder,
        curator.clone(),
        curator,
        config.consolidation.clone(),
    ));

    let queue = TaskQueue::open(store, config.queue.clone()).await?;
    let pool = queue.start(pipeline);
    tracing::info!("Recall running with {} workers, press Ctrl+C to stop", pool.size());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    pool.shutdown().await;
    Ok(())
}

async fn list_tasks(
    config: Config,
    status: Option<String>,
    name: Option<String>,
    limit: usize,
) -> Result<()> {
    let queue = TaskQueue::open(open_store(&config).await?, config.queue.clone()).await?;

    let mut filter = TaskFilter::new().with_limit(limit);
    if let Some(status) = status {
        let status = TaskStatus::parse(&status)
            .ok_or_else(|| RecallError::Config(format!("Unknown task status: {status}")))?;
        filter = filter.with_status(status);
    }
    if let Some(name) = name {
        filter = filter.with_name(&name);
    }

    let tasks = queue.list(&filter).await;
    if tasks.is_empty() {
        println!("No tasks");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {:<10} {:<14} {}/{}  {}",
            task.id,
            task.status,
            task.name,
            task.attempts,
            task.max_attempts,
            task.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn enqueue(config: Config, name: &str, params: &str, max_attempts: Option<u32>) -> Result<()> {
    let parameters: serde_json::Value = serde_json::from_str(params)?;
    let queue = TaskQueue::open(open_store(&config).await?, config.queue.clone()).await?;
    let id = queue.enqueue(name, parameters, max_attempts).await?;
    println!("{id}");
    Ok(())
}

async fn cancel(config: Config, id: Uuid) -> Result<()> {
    let queue = TaskQueue::open(open_store(&config).await?, config.queue.clone()).await?;
    if queue.cancel(id).await? {
        println!("Cancelled {id}");
    } else {
        let task = queue.status(id).await?;
        println!("Task {id} is already {}", task.status);
    }
    Ok(())
}

async fn ask(config: Config, owner: &str, question: &str) -> Result<()> {
    let questions = QuestionBook::new(open_store(&config).await?);
    let record = questions.add(owner, question, None).await?;
    println!("{}", record.id);
    Ok(())
}
