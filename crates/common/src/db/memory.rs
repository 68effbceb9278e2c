//! In-process store
//!
//! Implements the store traits over plain collections with the same
//! uniqueness and transaction semantics as the Postgres repository. A test
//! double for the pipeline stages; no binary wires it.

use crate::db::models::*;
use crate::db::repository::dedupe_by_statement;
use crate::db::store::{
    AnalysisStore, ApiUsageStore, BatchWriteSummary, CompanyRef, CompanyStatements,
    FinancialStore, NewCompany,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    next_id: i64,
    companies: BTreeMap<i64, Company>,
    currencies: BTreeMap<i64, Currency>,
    trackers: BTreeMap<i64, CompanyDataTracker>,
    usages: BTreeMap<NaiveDate, ApiUsage>,
    statements: BTreeMap<i64, FinancialStatement>,
    analyses: BTreeMap<i64, FinancialStatementAnalysis>,
    failing_writes: u32,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Consume one injected failure, if any
    fn check_write(&mut self) -> Result<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(AppError::Database(sea_orm::DbErr::Custom(
                "injected write failure".to_string(),
            )));
        }
        Ok(())
    }

    fn ensure_tracker(&mut self, company_id: i64) -> &mut CompanyDataTracker {
        let State {
            next_id, trackers, ..
        } = self;
        trackers.entry(company_id).or_insert_with(|| {
            *next_id += 1;
            CompanyDataTracker {
                id: *next_id,
                company_id,
                last_financial_report_fetch: None,
            }
        })
    }
}

/// Store backed by in-memory collections
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a company without a tracker. Returns its id.
    pub fn add_company(&self, name: &str, symbol: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.companies.insert(
            id,
            Company {
                id,
                name: name.to_string(),
                symbol: symbol.to_string(),
                cik: None,
                image: None,
                sector: None,
                industry: None,
                description: None,
                ipo_date: None,
            },
        );
        id
    }

    /// Add a currency. Returns its id.
    pub fn add_currency(&self, code: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.currencies.insert(
            id,
            Currency {
                id,
                code: code.to_string(),
                name: code.to_string(),
                symbol: code.to_string(),
            },
        );
        id
    }

    /// Create or update the tracker of a company
    pub fn set_last_fetch(&self, company_id: i64, fetched_on: Option<NaiveDate>) {
        let mut state = self.state();
        state.ensure_tracker(company_id).last_financial_report_fetch = fetched_on;
    }

    /// Insert a statement directly, bypassing the batch transaction. Returns its id.
    pub fn insert_statement(&self, statement: NewFinancialStatement) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.statements.insert(id, statement_row(id, statement));
        id
    }

    /// Set the last-modified date of a statement's analysis, creating an
    /// empty analysis when the statement has none
    pub fn set_analysis_modified(&self, statement_id: i64, modified_on: Option<NaiveDate>) {
        let mut state = self.state();
        if let Some(analysis) = state.analyses.get_mut(&statement_id) {
            analysis.last_modified = modified_on;
            return;
        }
        let id = state.next_id();
        state.analyses.insert(
            statement_id,
            FinancialStatementAnalysis {
                id,
                financial_statement_id: statement_id,
                analysis_text: None,
                embedding: None,
                last_modified: modified_on,
            },
        );
    }

    /// Make the next `count` writes fail with a database error
    pub fn fail_next_writes(&self, count: u32) {
        self.state().failing_writes = count;
    }

    pub fn companies(&self) -> Vec<Company> {
        self.state().companies.values().cloned().collect()
    }

    pub fn statements(&self) -> Vec<FinancialStatement> {
        self.state().statements.values().cloned().collect()
    }

    pub fn analyses(&self) -> Vec<FinancialStatementAnalysis> {
        self.state().analyses.values().cloned().collect()
    }

    pub fn analysis_for(&self, statement_id: i64) -> Option<FinancialStatementAnalysis> {
        self.state().analyses.get(&statement_id).cloned()
    }

    pub fn tracker(&self, company_id: i64) -> Option<CompanyDataTracker> {
        self.state().trackers.get(&company_id).cloned()
    }

    pub fn usage(&self, date: NaiveDate) -> Option<ApiUsage> {
        self.state().usages.get(&date).cloned()
    }
}

fn statement_row(id: i64, s: NewFinancialStatement) -> FinancialStatement {
    FinancialStatement {
        id,
        company_id: s.company_id,
        date_reported: s.date_reported,
        calendar_year: s.calendar_year,
        period: s.period,
        currency_id: s.currency_id,
        revenue: s.revenue,
        net_income: s.net_income,
        gross_profit: s.gross_profit,
        operating_income: s.operating_income,
        income_before_tax: s.income_before_tax,
        operating_expenses: s.operating_expenses,
        cash_and_equivalents: s.cash_and_equivalents,
        research_and_development_expenses: s.research_and_development_expenses,
    }
}

#[async_trait]
impl ApiUsageStore for MemoryStore {
    async fn usage_for(&self, date: NaiveDate) -> Result<ApiUsage> {
        let mut state = self.state();
        if let Some(usage) = state.usages.get(&date) {
            return Ok(usage.clone());
        }
        state.check_write()?;
        let id = state.next_id();
        let usage = ApiUsage {
            id,
            date,
            limit_reached: false,
        };
        state.usages.insert(date, usage.clone());
        Ok(usage)
    }

    async fn mark_limit_reached(&self, date: NaiveDate) -> Result<()> {
        let mut state = self.state();
        state.check_write()?;
        match state.usages.get_mut(&date) {
            Some(usage) => usage.limit_reached = true,
            None => {
                let id = state.next_id();
                state.usages.insert(
                    date,
                    ApiUsage {
                        id,
                        date,
                        limit_reached: true,
                    },
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FinancialStore for MemoryStore {
    async fn insert_companies(&self, companies: Vec<NewCompany>) -> Result<u64> {
        let mut state = self.state();
        state.check_write()?;

        let mut known: HashSet<String> =
            state.companies.values().map(|c| c.symbol.clone()).collect();
        let mut inserted = 0;

        for company in companies {
            if !known.insert(company.symbol.clone()) {
                continue;
            }
            let id = state.next_id();
            state.companies.insert(
                id,
                Company {
                    id,
                    name: company.name,
                    symbol: company.symbol,
                    cik: None,
                    image: None,
                    sector: None,
                    industry: None,
                    description: None,
                    ipo_date: None,
                },
            );
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn currencies(&self) -> Result<Vec<Currency>> {
        Ok(self.state().currencies.values().cloned().collect())
    }

    async fn companies_due_for_fetch(&self, cutoff: NaiveDate) -> Result<Vec<CompanyRef>> {
        let mut state = self.state();
        let companies: Vec<(i64, String)> = state
            .companies
            .values()
            .map(|c| (c.id, c.symbol.clone()))
            .collect();

        let mut due = Vec::new();
        for (company_id, symbol) in companies {
            if state.ensure_tracker(company_id).is_due(cutoff) {
                due.push(CompanyRef { company_id, symbol });
            }
        }

        Ok(due)
    }

    async fn save_fetch_batch(
        &self,
        statements: Vec<NewFinancialStatement>,
        stamped: &[i64],
        fetched_on: NaiveDate,
    ) -> Result<BatchWriteSummary> {
        let mut state = self.state();
        state.check_write()?;

        let mut keys: HashSet<StatementKey> =
            state.statements.values().map(FinancialStatement::key).collect();
        let mut summary = BatchWriteSummary::default();

        for statement in statements {
            if !keys.insert(statement.key()) {
                continue;
            }
            let id = state.next_id();
            state.statements.insert(id, statement_row(id, statement));
            summary.statements_inserted += 1;
        }

        for company_id in stamped {
            state.ensure_tracker(*company_id).last_financial_report_fetch = Some(fetched_on);
            summary.trackers_stamped += 1;
        }

        Ok(summary)
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn companies_needing_analysis(&self, cutoff: NaiveDate) -> Result<Vec<CompanyStatements>> {
        let state = self.state();

        let stale: HashSet<i64> = state
            .statements
            .values()
            .filter(|s| {
                state
                    .analyses
                    .get(&s.id)
                    .and_then(|a| a.last_modified)
                    .map_or(true, |modified| modified < cutoff)
            })
            .map(|s| s.company_id)
            .collect();

        Ok(state
            .companies
            .values()
            .filter(|c| stale.contains(&c.id))
            .map(|company| {
                let mut statements: Vec<FinancialStatement> = state
                    .statements
                    .values()
                    .filter(|s| s.company_id == company.id)
                    .cloned()
                    .collect();
                statements.sort_by(|a, b| {
                    b.calendar_year
                        .cmp(&a.calendar_year)
                        .then(b.date_reported.cmp(&a.date_reported))
                        .then(a.id.cmp(&b.id))
                });
                CompanyStatements {
                    company: company.clone(),
                    statements,
                }
            })
            .collect())
    }

    async fn save_analyses(&self, records: Vec<NewAnalysis>, modified_on: NaiveDate) -> Result<u64> {
        let records = dedupe_by_statement(records);
        if records.is_empty() {
            return Ok(0);
        }

        let mut state = self.state();
        state.check_write()?;

        let mut written = 0;
        for record in records {
            let literal = to_vector_literal(&record.embedding);
            match state.analyses.get_mut(&record.financial_statement_id) {
                Some(existing) => {
                    existing.analysis_text = Some(record.analysis_text);
                    existing.embedding = Some(literal);
                    existing.last_modified = Some(modified_on);
                }
                None => {
                    let id = state.next_id();
                    state.analyses.insert(
                        record.financial_statement_id,
                        FinancialStatementAnalysis {
                            id,
                            financial_statement_id: record.financial_statement_id,
                            analysis_text: Some(record.analysis_text),
                            embedding: Some(literal),
                            last_modified: Some(modified_on),
                        },
                    );
                }
            }
            written += 1;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn statement(company_id: i64, currency_id: i64, year: i32) -> NewFinancialStatement {
        NewFinancialStatement {
            company_id,
            date_reported: day(year, 12, 31),
            calendar_year: year,
            period: Period::FY,
            currency_id,
            revenue: None,
            net_income: None,
            gross_profit: None,
            operating_income: None,
            income_before_tax: None,
            operating_expenses: None,
            cash_and_equivalents: None,
            research_and_development_expenses: None,
        }
    }

    #[tokio::test]
    async fn test_due_companies_create_missing_trackers() {
        let store = MemoryStore::new();
        let fresh = store.add_company("Fresh", "FRSH");
        let stale = store.add_company("Stale", "STAL");
        let new = store.add_company("New", "NEW");
        store.set_last_fetch(fresh, Some(day(2024, 6, 1)));
        store.set_last_fetch(stale, Some(day(2022, 1, 1)));

        let due = store.companies_due_for_fetch(day(2023, 6, 1)).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|c| c.company_id).collect();

        assert_eq!(ids, vec![stale, new]);
        assert!(store.tracker(new).is_some());
    }

    #[tokio::test]
    async fn test_fetch_batch_ignores_duplicate_statements() {
        let store = MemoryStore::new();
        let company = store.add_company("Acme", "ACME");
        let usd = store.add_currency("USD");

        let summary = store
            .save_fetch_batch(
                vec![statement(company, usd, 2023), statement(company, usd, 2023)],
                &[company],
                day(2024, 1, 1),
            )
            .await
            .unwrap();

        assert_eq!(summary.statements_inserted, 1);
        assert_eq!(summary.trackers_stamped, 1);
        assert_eq!(
            store.tracker(company).unwrap().last_financial_report_fetch,
            Some(day(2024, 1, 1))
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let store = MemoryStore::new();
        let company = store.add_company("Acme", "ACME");
        let usd = store.add_currency("USD");
        store.fail_next_writes(1);

        let result = store
            .save_fetch_batch(vec![statement(company, usd, 2023)], &[company], day(2024, 1, 1))
            .await;

        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, AppError::Database(_)));
        assert!(store.statements().is_empty());
        assert!(store.tracker(company).is_none());
    }

    #[tokio::test]
    async fn test_mark_limit_reached_is_idempotent() {
        let store = MemoryStore::new();
        let today = day(2024, 3, 1);

        assert!(!store.usage_for(today).await.unwrap().limit_reached);
        tokio_test::assert_ok!(store.mark_limit_reached(today).await);
        tokio_test::assert_ok!(store.mark_limit_reached(today).await);

        assert!(store.usage_for(today).await.unwrap().limit_reached);
    }

    #[tokio::test]
    async fn test_analysis_selection_returns_all_statements_of_stale_company() {
        let store = MemoryStore::new();
        let company = store.add_company("Acme", "ACME");
        let usd = store.add_currency("USD");
        let old = store.insert_statement(statement(company, usd, 2021));
        let newer = store.insert_statement(statement(company, usd, 2023));

        store
            .save_analyses(
                vec![NewAnalysis {
                    financial_statement_id: newer,
                    analysis_text: "done".into(),
                    embedding: vec![1.0],
                }],
                day(2024, 1, 1),
            )
            .await
            .unwrap();

        let pending = store.companies_needing_analysis(day(2023, 1, 1)).await.unwrap();
        assert_eq!(pending.len(), 1);
        let ids: Vec<i64> = pending[0].statements.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer, old]);
    }
}
