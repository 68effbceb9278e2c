//! Fetch scheduling
//!
//! Selects companies whose income statements are missing or stale and
//! dispatches them to the fetch queue in bounded batches.

use chrono::NaiveDate;
use finvantage_common::db::{CompanyRef, FinancialStore};
use finvantage_common::errors::Result;
use finvantage_common::queue::{dispatch, FetchReportJob, JobQueue, QueueName};
use finvantage_common::staleness_cutoff;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Summary of one scheduling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub companies: usize,
    pub jobs: usize,
}

pub struct FetchScheduler {
    store: Arc<dyn FinancialStore>,
    queue: Arc<dyn JobQueue>,
    batch_size: usize,
    staleness_months: u32,
}

impl FetchScheduler {
    pub fn new(
        store: Arc<dyn FinancialStore>,
        queue: Arc<dyn JobQueue>,
        batch_size: usize,
        staleness_months: u32,
    ) -> Self {
        Self {
            store,
            queue,
            batch_size: batch_size.max(1),
            staleness_months,
        }
    }

    /// Dispatch one `FetchReportJob` per batch of due companies.
    ///
    /// An enqueue failure stops the pass; the companies it did not dispatch
    /// are still due on the next pass.
    #[instrument(skip(self))]
    pub async fn run(&self, today: NaiveDate) -> Result<ScheduleReport> {
        let cutoff = staleness_cutoff(today, self.staleness_months);
        let due = self.store.companies_due_for_fetch(cutoff).await?;

        if due.is_empty() {
            info!("No companies due for a financial report fetch");
            return Ok(ScheduleReport::default());
        }

        let mut report = ScheduleReport {
            companies: due.len(),
            jobs: 0,
        };

        for companies in partition(due, self.batch_size) {
            let job = FetchReportJob {
                job_id: Uuid::new_v4(),
                companies,
            };
            dispatch(self.queue.as_ref(), QueueName::FetchFinancialReport, &job).await?;
            info!(
                job_id = %job.job_id,
                companies = job.companies.len(),
                queue = %QueueName::FetchFinancialReport,
                "Queued fetch job"
            );
            report.jobs += 1;
        }

        info!(companies = report.companies, jobs = report.jobs, "Fetch scheduling done");
        Ok(report)
    }
}

/// Split into consecutive batches of at most `size`, preserving order
pub fn partition(companies: Vec<CompanyRef>, size: usize) -> Vec<Vec<CompanyRef>> {
    companies
        .chunks(size.max(1))
        .map(<[CompanyRef]>::to_vec)
        .collect()
}
