//! Persistence seams of the pipeline
//!
//! Schedulers and workers only see these traits. `Repository` implements them
//! on Postgres, `MemoryStore` in process.

use crate::db::models::{
    ApiUsage, Company, Currency, FinancialStatement, NewAnalysis, NewFinancialStatement,
};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Company reference carried by fetch jobs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyRef {
    pub company_id: i64,
    pub symbol: String,
}

/// Company row produced by the listing sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCompany {
    pub name: String,
    pub symbol: String,
}

/// A company with all of its statements, newest calendar year first
#[derive(Debug, Clone)]
pub struct CompanyStatements {
    pub company: Company,
    pub statements: Vec<FinancialStatement>,
}

/// Outcome of one fetch-batch transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchWriteSummary {
    /// New rows; duplicates of existing statements are not counted
    pub statements_inserted: u64,
    pub trackers_stamped: u64,
}

/// Daily quota bookkeeping
#[async_trait]
pub trait ApiUsageStore: Send + Sync {
    /// Usage row for `date`, created with `limit_reached = false` when absent.
    async fn usage_for(&self, date: NaiveDate) -> Result<ApiUsage>;

    /// Set `limit_reached` for `date` with a single atomic upsert.
    async fn mark_limit_reached(&self, date: NaiveDate) -> Result<()>;
}

/// Company registry, freshness trackers and statements
#[async_trait]
pub trait FinancialStore: Send + Sync {
    /// Insert companies, skipping symbols that already exist. Returns rows inserted.
    async fn insert_companies(&self, companies: Vec<NewCompany>) -> Result<u64>;

    async fn currencies(&self) -> Result<Vec<Currency>>;

    /// Companies with no tracker, a null fetch date, or a fetch date before
    /// `cutoff`, ordered by id. Missing trackers are created on the way.
    async fn companies_due_for_fetch(&self, cutoff: NaiveDate) -> Result<Vec<CompanyRef>>;

    /// Insert statements (ignoring duplicates of the uniqueness tuple) and stamp
    /// the trackers of `stamped` with `fetched_on`, all in one transaction.
    async fn save_fetch_batch(
        &self,
        statements: Vec<NewFinancialStatement>,
        stamped: &[i64],
        fetched_on: NaiveDate,
    ) -> Result<BatchWriteSummary>;
}

/// Statement analyses (sentence + embedding)
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Companies owning at least one statement whose analysis is missing or
    /// was last modified before `cutoff`, ordered by id. Every statement of
    /// such a company is returned, newest calendar year first.
    async fn companies_needing_analysis(&self, cutoff: NaiveDate) -> Result<Vec<CompanyStatements>>;

    /// Upsert analyses in a single write. Returns rows written.
    async fn save_analyses(&self, records: Vec<NewAnalysis>, modified_on: NaiveDate) -> Result<u64>;
}
