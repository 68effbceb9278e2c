//! FinVantage Ingestion Service
//!
//! Keeps the company registry and financial statements fresh:
//! 1. `sync-companies` registers companies from the exchange listing
//! 2. `schedule` dispatches fetch jobs for companies with stale statements
//! 3. `work` consumes fetch jobs and persists income statements

mod client;
mod errors;
mod fetcher;
mod quota;
mod scheduler;
mod statements;
mod sync;

use crate::client::FinancialDataClient;
use crate::fetcher::{FetchReport, FinancialReportFetcher};
use crate::quota::QuotaTracker;
use crate::scheduler::FetchScheduler;
use crate::sync::CompanySync;
use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use finvantage_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    metrics,
    queue::{run_consumer, FetchReportJob, Queue, QueueName, SqsJobQueue},
    telemetry, VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ingestion", version, about = "FinVantage ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register companies listed on the configured exchanges
    SyncCompanies,
    /// Dispatch fetch jobs for companies with missing or stale statements
    Schedule {
        /// Repeat the pass every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Consume fetch jobs from the queue
    Work,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing and metrics
    telemetry::init_tracing(&config.observability);
    metrics::install_exporter(config.observability.metrics_port)?;

    info!("Starting FinVantage Ingestion Service v{}", VERSION);

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    let repository = Arc::new(Repository::new(db));

    let client = Arc::new(FinancialDataClient::new(
        &config.financial_api,
        config.retry.policy(),
    )?);
    let quota = QuotaTracker::new(repository.clone(), config.financial_api.paid_plan);

    match cli.command {
        Command::SyncCompanies => {
            let sync = CompanySync::new(
                client,
                quota,
                repository,
                &config.financial_api.stock_exchanges,
            );
            let report = sync.run(today()).await;
            info!(outcome = ?report.outcome, inserted = report.inserted, "Company sync finished");
        }
        Command::Schedule { every } => {
            let queue = Arc::new(SqsJobQueue::new(&config.queue).await);
            let scheduler = FetchScheduler::new(
                repository,
                queue,
                config.pipeline.fetch_batch_size,
                config.pipeline.staleness_months,
            );

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
                                    error!(error = %e, "Fetch scheduling pass failed");
                                }
                            }
                        }
                    }
                }
            }
        }
        Command::Work => {
            let url = config
                .queue
                .fetch_queue_url
                .clone()
                .context("queue.fetch_queue_url is required for `work`")?;
            let source = Queue::connect(url, &config.queue).await;

            let fetcher = FinancialReportFetcher::new(
                client,
                quota,
                repository,
                config.financial_api.quota_cooldown(),
                config.pipeline.stamp_policy,
            );

            info!("Ingestion worker ready, starting queue polling...");
            run_consumer(
                &source,
                QueueName::FetchFinancialReport,
                |job: FetchReportJob| handle(&fetcher, job),
                async {
                    let _ = tokio::signal::ctrl_c().await;
                },
            )
            .await;
        }
    }

    info!("Ingestion service shutting down");
    Ok(())
}

async fn handle(fetcher: &FinancialReportFetcher, job: FetchReportJob) -> FetchReport {
    info!(
        job_id = %job.job_id,
        companies = job.companies.len(),
        "Received fetch job"
    );
    fetcher.process_job(job, today()).await
}

fn today() -> chrono::NaiveDate {
    Utc::now().date_naive()
}
