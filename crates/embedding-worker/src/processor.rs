//! Embedding worker processor
//!
//! Processes sentence batches: embeds each company's sentences in one provider
//! call and stores the resulting analyses in a single write.

use crate::errors::EmbeddingError;
use chrono::NaiveDate;
use finvantage_common::db::models::NewAnalysis;
use finvantage_common::db::AnalysisStore;
use finvantage_common::embeddings::Embedder;
use finvantage_common::metrics;
use finvantage_common::queue::{CompanySentences, JobOutcome, SentenceBatchJob};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingOutcome {
    Completed,
    /// Some companies were dropped; the others were persisted
    Partial,
    /// No company produced records
    NothingEmbedded,
    /// The batch write failed and was dropped
    PersistenceFailed,
}

impl EmbeddingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EmbeddingOutcome::Completed => "completed",
            EmbeddingOutcome::Partial => "partial",
            EmbeddingOutcome::NothingEmbedded => "nothing_embedded",
            EmbeddingOutcome::PersistenceFailed => "persistence_failed",
        }
    }
}

/// Summary of one sentence batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingReport {
    pub job_id: Uuid,
    pub outcome: EmbeddingOutcome,
    pub companies: usize,
    pub companies_failed: usize,
    pub records_written: u64,
}

impl JobOutcome for EmbeddingReport {
    fn label(&self) -> &'static str {
        self.outcome.label()
    }
}

pub struct EmbeddingWorker {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn AnalysisStore>,
    concurrency: usize,
}

impl EmbeddingWorker {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn AnalysisStore>, concurrency: usize) -> Self {
        Self {
            embedder,
            store,
            concurrency: concurrency.max(1),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn process_job(&self, job: SentenceBatchJob, today: NaiveDate) -> EmbeddingReport {
        info!(
            companies = job.companies.len(),
            model = %self.embedder.model_name(),
            "Processing sentence batch"
        );

        let companies = job.companies.len();
        let results: Vec<(i64, Result<Vec<NewAnalysis>, EmbeddingError>)> =
            stream::iter(job.companies.into_iter().map(|c| self.embed_company(c)))
                .buffered(self.concurrency)
                .collect()
                .await;

        let mut records = Vec::new();
        let mut companies_failed = 0;
        for (company_id, result) in results {
            match result {
                Ok(company_records) => records.extend(company_records),
                Err(e) => {
                    companies_failed += 1;
                    error!(company_id, kind = e.kind(), error = %e, "Dropping company embeddings");
                }
            }
        }

        let mut report = EmbeddingReport {
            job_id: job.job_id,
            outcome: EmbeddingOutcome::Completed,
            companies,
            companies_failed,
            records_written: 0,
        };

        if records.is_empty() {
            if companies_failed > 0 {
                report.outcome = EmbeddingOutcome::NothingEmbedded;
            }
            info!(outcome = report.outcome.label(), "No analysis records to store");
            return report;
        }

        debug!(records = records.len(), "Storing analyses");
        match self.store.save_analyses(records, today).await {
            Ok(written) => {
                metrics::record_analyses_written(written);
                report.records_written = written;
                if companies_failed > 0 {
                    report.outcome = EmbeddingOutcome::Partial;
                }
                info!(
                    written,
                    companies_failed,
                    outcome = report.outcome.label(),
                    "Sentence batch stored"
                );
            }
            Err(e) => {
                // Left for the next scheduling pass to re-select
                error!(error = %e, "Failed to store analyses, dropping batch");
                report.outcome = EmbeddingOutcome::PersistenceFailed;
            }
        }

        report
    }

    /// Embed one company's sentences in a single provider call
    async fn embed_company(
        &self,
        company: CompanySentences,
    ) -> (i64, Result<Vec<NewAnalysis>, EmbeddingError>) {
        let company_id = company.company_id;
        (company_id, self.pair_vectors(company).await)
    }

    async fn pair_vectors(&self, company: CompanySentences) -> Result<Vec<NewAnalysis>, EmbeddingError> {
        if company.sentences.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = company.sentences.iter().map(|s| s.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::LengthMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }

        let expected = self.embedder.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                got: bad.len(),
            });
        }

        Ok(company
            .sentences
            .into_iter()
            .zip(vectors)
            .map(|(sentence, embedding)| NewAnalysis {
                financial_statement_id: sentence.statement_id,
                analysis_text: sentence.text,
                embedding,
            })
            .collect())
    }

    /// Embed a single text (for testing)
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embedder.embed(text).await?)
    }
}
