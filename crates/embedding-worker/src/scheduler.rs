//! Embedding scheduling
//!
//! Regenerates the sentences of every company with a missing or stale
//! analysis and dispatches them to the sentences queue.

use crate::sentences::generate_sentence;
use chrono::NaiveDate;
use finvantage_common::db::{AnalysisStore, CompanyStatements};
use finvantage_common::errors::Result;
use finvantage_common::queue::{
    dispatch, CompanySentences, JobQueue, QueueName, SentenceBatchJob, TaggedSentence,
};
use finvantage_common::staleness_cutoff;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Analyses older than this are regenerated
const ANALYSIS_STALENESS_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingScheduleReport {
    pub companies: usize,
    pub sentences: usize,
    pub jobs: usize,
}

pub struct EmbeddingScheduler {
    store: Arc<dyn AnalysisStore>,
    queue: Arc<dyn JobQueue>,
    batch_size: usize,
}

impl EmbeddingScheduler {
    pub fn new(store: Arc<dyn AnalysisStore>, queue: Arc<dyn JobQueue>, batch_size: usize) -> Self {
        Self {
            store,
            queue,
            batch_size: batch_size.max(1),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, today: NaiveDate) -> Result<EmbeddingScheduleReport> {
        let cutoff = staleness_cutoff(today, ANALYSIS_STALENESS_MONTHS);
        let companies: Vec<CompanySentences> = self
            .store
            .companies_needing_analysis(cutoff)
            .await?
            .iter()
            .map(company_sentences)
            .collect();

        let mut report = EmbeddingScheduleReport {
            companies: companies.len(),
            sentences: companies.iter().map(|c| c.sentences.len()).sum(),
            jobs: 0,
        };
        info!(companies = report.companies, "Generated sentences");

        for batch in companies.chunks(self.batch_size) {
            let job = SentenceBatchJob {
                job_id: Uuid::new_v4(),
                companies: batch.to_vec(),
            };
            dispatch(self.queue.as_ref(), QueueName::FinancialSentences, &job).await?;
            info!(
                job_id = %job.job_id,
                companies = job.companies.len(),
                queue = %QueueName::FinancialSentences,
                "Queued sentence batch"
            );
            report.jobs += 1;
        }

        Ok(report)
    }
}

/// Sentences for all of a company's statements, in the store's order
fn company_sentences(entry: &CompanyStatements) -> CompanySentences {
    CompanySentences {
        company_id: entry.company.id,
        sentences: entry
            .statements
            .iter()
            .map(|statement| TaggedSentence {
                statement_id: statement.id,
                text: generate_sentence(&entry.company, statement),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finvantage_common::db::models::{NewFinancialStatement, Period};
    use finvantage_common::db::MemoryStore;
    use finvantage_common::queue::MemoryQueue;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn add_statement(store: &MemoryStore, company_id: i64, currency_id: i64, year: i32) -> i64 {
        store.insert_statement(NewFinancialStatement {
            company_id,
            date_reported: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
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
        })
    }

    #[tokio::test]
    async fn test_regenerates_every_statement_of_stale_company() {
        let store = Arc::new(MemoryStore::new());
        let usd = store.add_currency("USD");
        let acme = store.add_company("Acme", "ACME");
        let older = add_statement(&store, acme, usd, 2021);
        let newer = add_statement(&store, acme, usd, 2023);
        store.set_analysis_modified(older, Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));

        let fresh = store.add_company("Fresh", "FRSH");
        let done = add_statement(&store, fresh, usd, 2023);
        store.set_analysis_modified(done, Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));

        let queue = Arc::new(MemoryQueue::new());
        let report = tokio_test::assert_ok!(
            EmbeddingScheduler::new(store, queue.clone(), 20).run(today()).await
        );

        assert_eq!(report, EmbeddingScheduleReport { companies: 1, sentences: 2, jobs: 1 });

        let jobs: Vec<SentenceBatchJob> = queue.jobs(QueueName::FinancialSentences);
        let company = &jobs[0].companies[0];
        assert_eq!(company.company_id, acme);
        let ids: Vec<i64> = company.sentences.iter().map(|s| s.statement_id).collect();
        assert_eq!(ids, vec![newer, older]);
        assert!(company.sentences[0].text.contains("for the year 2023"));
    }

    #[tokio::test]
    async fn test_batches_companies_by_twenty() {
        let store = Arc::new(MemoryStore::new());
        let usd = store.add_currency("USD");
        for i in 0..45 {
            let id = store.add_company(&format!("Company {}", i), &format!("C{}", i));
            add_statement(&store, id, usd, 2023);
        }

        let queue = Arc::new(MemoryQueue::new());
        let report = EmbeddingScheduler::new(store, queue.clone(), 20)
            .run(today())
            .await
            .unwrap();

        assert_eq!(report.jobs, 3);
        let sizes: Vec<usize> = queue
            .jobs::<SentenceBatchJob>(QueueName::FinancialSentences)
            .iter()
            .map(|j| j.companies.len())
            .collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }
}
