//! FinVantage Embedding Worker
//!
//! Keeps statement analyses fresh:
//! 1. `schedule` renders sentences for companies with missing or stale analyses
//!    and queues them in batches
//! 2. `work` embeds queued sentence batches and stores the analyses
//! 3. `test` embeds a single text and prints the vector

mod errors;
mod processor;
mod scheduler;
mod sentences;

use crate::processor::{EmbeddingReport, EmbeddingWorker};
use crate::scheduler::EmbeddingScheduler;
use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use finvantage_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    embeddings::create_embedder,
    metrics,
    queue::{run_consumer, Queue, QueueName, SentenceBatchJob, SqsJobQueue},
    telemetry, VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "embedding-worker", version, about = "FinVantage embedding worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue sentence batches for companies with missing or stale analyses
    Schedule {
        /// Repeat the pass every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Consume sentence batches from the queue
    Work,
    /// Embed a single text and print the result
    Test {
        text: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    telemetry::init_tracing(&config.observability);
    metrics::install_exporter(config.observability.metrics_port)?;

    info!("Starting FinVantage Embedding Worker v{}", VERSION);

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    let repository = Arc::new(Repository::new(db));

    match cli.command {
        Command::Schedule { every } => {
            let queue = Arc::new(SqsJobQueue::new(&config.queue).await);
            let scheduler =
                EmbeddingScheduler::new(repository, queue, config.pipeline.embedding_batch_size);

            match every {
                None => {
                    scheduler.run(today()).await?;
                }
                Some(secs) => {
                    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
                    loop {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {
                                info!("Shutdown signal received");
                                break;
                            }
                            _ = ticker.tick() => {
                                if let Err(e) = scheduler.run(today()).await {
                                    error!(error = %e, "Embedding scheduling pass failed");
                                }
                            }
                        }
                    }
                }
            }
        }
        Command::Work => {
            let worker = build_worker(&config, repository)?;
            let url = config
                .queue
                .sentences_queue_url
                .clone()
                .context("queue.sentences_queue_url is required for `work`")?;
            info!(url = %url, "Connecting to sentences queue...");
            let source = Queue::connect(url, &config.queue).await;

            info!("Embedding worker ready, starting queue polling...");
            run_consumer(
                &source,
                QueueName::FinancialSentences,
                |job: SentenceBatchJob| handle(&worker, job),
                async {
                    let _ = tokio::signal::ctrl_c().await;
                },
            )
            .await;
        }
        Command::Test { text } => {
            let worker = build_worker(&config, repository)?;
            let text = text.unwrap_or_else(|| "This is a test sentence for embedding.".to_string());

            info!("Running in test mode...");
            let embedding = worker.embed_single(&text).await?;
            println!("Embedding generated successfully!");
            println!("  Dimension: {}", embedding.len());
            println!("  First 5 values: {:?}", &embedding[..5.min(embedding.len())]);
        }
    }

    info!("Embedding worker shutting down");
    Ok(())
}

fn build_worker(config: &AppConfig, repository: Arc<Repository>) -> anyhow::Result<EmbeddingWorker> {
    let embedder = create_embedder(&config.embedding, config.retry.policy())?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );
    Ok(EmbeddingWorker::new(
        embedder,
        repository,
        config.embedding.concurrency,
    ))
}

async fn handle(worker: &EmbeddingWorker, job: SentenceBatchJob) -> EmbeddingReport {
    info!(
        job_id = %job.job_id,
        companies = job.companies.len(),
        "Received sentence batch"
    );
    worker.process_job(job, today()).await
}

fn today() -> chrono::NaiveDate {
    Utc::now().date_naive()
}
