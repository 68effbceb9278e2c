//! Financial report fetching
//!
//! Handles one `FetchReportJob`: fetches the annual income statements of each
//! company in the batch, parses them, and persists statements and tracker
//! stamps in a single transaction.

use crate::client::FinancialDataClient;
use crate::errors::ApiError;
use crate::quota::QuotaTracker;
use crate::statements::{parse_statement, CurrencyIndex};
use chrono::NaiveDate;
use finvantage_common::config::StampPolicy;
use finvantage_common::db::models::NewFinancialStatement;
use finvantage_common::db::{CompanyRef, FinancialStore};
use finvantage_common::metrics;
use finvantage_common::queue::{FetchReportJob, JobOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How a fetch job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Every company was attempted and the results were persisted
    Completed,
    /// Today's quota was already exhausted; nothing was done
    Skipped,
    /// The free-plan quota ran out mid-batch; the remainder was not attempted
    QuotaExhausted,
    /// Reading or writing the store failed; the batch's writes are lost
    PersistenceFailed,
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Completed => "completed",
            FetchOutcome::Skipped => "skipped",
            FetchOutcome::QuotaExhausted => "quota_exhausted",
            FetchOutcome::PersistenceFailed => "persistence_failed",
        }
    }
}

/// Summary of one fetch job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub job_id: Uuid,
    pub outcome: FetchOutcome,
    pub companies_attempted: usize,
    pub companies_failed: usize,
    pub statements_parsed: usize,
    pub records_dropped: usize,
    pub statements_inserted: u64,
    pub trackers_stamped: u64,
}

impl FetchReport {
    fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            outcome: FetchOutcome::Completed,
            companies_attempted: 0,
            companies_failed: 0,
            statements_parsed: 0,
            records_dropped: 0,
            statements_inserted: 0,
            trackers_stamped: 0,
        }
    }
}

impl JobOutcome for FetchReport {
    fn label(&self) -> &'static str {
        self.outcome.label()
    }
}

pub struct FinancialReportFetcher {
    client: Arc<FinancialDataClient>,
    quota: QuotaTracker,
    store: Arc<dyn FinancialStore>,
    quota_cooldown: Duration,
    stamp_policy: StampPolicy,
}

impl FinancialReportFetcher {
    pub fn new(
        client: Arc<FinancialDataClient>,
        quota: QuotaTracker,
        store: Arc<dyn FinancialStore>,
        quota_cooldown: Duration,
        stamp_policy: StampPolicy,
    ) -> Self {
        Self {
            client,
            quota,
            store,
            quota_cooldown,
            stamp_policy,
        }
    }

    /// Process one fetch job. Never fails: every failure ends up in the report.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, companies = job.companies.len()))]
    pub async fn process_job(&self, job: FetchReportJob, today: NaiveDate) -> FetchReport {
        let mut report = FetchReport::new(job.job_id);

        match self.quota.is_usable(today).await {
            Ok(true) => {}
            Ok(false) => {
                info!("API limit reached for today, skipping batch");
                report.outcome = FetchOutcome::Skipped;
                return report;
            }
            Err(e) => {
                error!(error = %e, "Failed to read API usage, skipping batch");
                report.outcome = FetchOutcome::PersistenceFailed;
                return report;
            }
        }

        let currencies = match self.store.currencies().await {
            Ok(currencies) => CurrencyIndex::new(&currencies),
            Err(e) => {
                error!(error = %e, "Failed to load currencies, skipping batch");
                report.outcome = FetchOutcome::PersistenceFailed;
                return report;
            }
        };

        let mut statements = Vec::new();
        let mut stamped = Vec::new();

        for company in &job.companies {
            report.companies_attempted += 1;

            match self.client.income_statements(&company.symbol).await {
                Ok(records) => {
                    let parsed = self.parse_records(company, &records, &currencies, &mut report);
                    if self.should_stamp(!parsed.is_empty()) {
                        stamped.push(company.company_id);
                    }
                    statements.extend(parsed);
                }
                Err(ApiError::QuotaExceeded) if self.quota.paid_plan() => {
                    report.companies_failed += 1;
                    metrics::record_fetch_failure(ApiError::QuotaExceeded.kind());
                    warn!(
                        symbol = %company.symbol,
                        cooldown_secs = self.quota_cooldown.as_secs(),
                        "Rate limited on paid plan, cooling down"
                    );
                    if self.should_stamp(false) {
                        stamped.push(company.company_id);
                    }
                    tokio::time::sleep(self.quota_cooldown).await;
                }
                Err(ApiError::QuotaExceeded) => {
                    report.companies_failed += 1;
                    metrics::record_fetch_failure(ApiError::QuotaExceeded.kind());
                    if let Err(e) = self.quota.mark_exhausted(today, "fetch").await {
                        error!(error = %e, "Failed to mark API usage as exhausted");
                    }
                    info!(
                        remaining = job.companies.len() - report.companies_attempted,
                        "Aborting rest of the batch"
                    );
                    report.outcome = FetchOutcome::QuotaExhausted;
                    break;
                }
                Err(e) => {
                    report.companies_failed += 1;
                    metrics::record_fetch_failure(e.kind());
                    warn!(symbol = %company.symbol, error = %e, "Failed to fetch income statements");
                    if self.should_stamp(false) {
                        stamped.push(company.company_id);
                    }
                }
            }
        }

        report.statements_parsed = statements.len();

        match self.store.save_fetch_batch(statements, &stamped, today).await {
            Ok(summary) => {
                report.statements_inserted = summary.statements_inserted;
                report.trackers_stamped = summary.trackers_stamped;
                metrics::record_statements_ingested(summary.statements_inserted);
            }
            Err(e) => {
                error!(error = %e, "Failed to persist fetch batch, writes dropped");
                report.outcome = FetchOutcome::PersistenceFailed;
                return report;
            }
        }

        info!(
            outcome = report.outcome.label(),
            attempted = report.companies_attempted,
            failed = report.companies_failed,
            parsed = report.statements_parsed,
            dropped = report.records_dropped,
            inserted = report.statements_inserted,
            stamped = report.trackers_stamped,
            "Fetch job finished"
        );

        report
    }

    fn should_stamp(&self, yielded_statements: bool) -> bool {
        match self.stamp_policy {
            StampPolicy::AllAttempted => true,
            StampPolicy::OnlyWithStatements => yielded_statements,
        }
    }

    fn parse_records(
        &self,
        company: &CompanyRef,
        records: &[Value],
        currencies: &CurrencyIndex,
        report: &mut FetchReport,
    ) -> Vec<NewFinancialStatement> {
        records
            .iter()
            .filter_map(|record| match parse_statement(company.company_id, record, currencies) {
                Ok(statement) => Some(statement),
                Err(e) => {
                    report.records_dropped += 1;
                    warn!(symbol = %company.symbol, error = %e, "Dropping income statement record");
                    None
                }
            })
            .collect()
    }
}
