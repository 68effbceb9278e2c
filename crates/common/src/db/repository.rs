//! Repository pattern for database operations
//!
//! Postgres implementation of the pipeline store traits. Bulk writes rely on
//! the unique constraints of the schema (`ON CONFLICT`) for idempotence.

use crate::db::models::*;
use crate::db::store::{
    AnalysisStore, ApiUsageStore, BatchWriteSummary, CompanyRef, CompanyStatements,
    FinancialStore, NewCompany,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    EntityTrait, JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, Statement,
    TransactionTrait,
};
use std::collections::HashMap;
use tracing::debug;

/// Companies per INSERT when syncing the listing
const COMPANY_INSERT_CHUNK: usize = 1000;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.connection()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

// ========================================================================
// Api Usage
// ========================================================================

#[async_trait]
impl ApiUsageStore for Repository {
    async fn usage_for(&self, date: NaiveDate) -> Result<ApiUsage> {
        let row = ApiUsageActiveModel {
            id: NotSet,
            date: Set(date),
            limit_reached: Set(false),
        };

        ApiUsageEntity::insert(row)
            .on_conflict(
                OnConflict::column(ApiUsageColumn::Date)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.conn())
            .await?;

        ApiUsageEntity::find()
            .filter(ApiUsageColumn::Date.eq(date))
            .one(self.conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "api_usage".to_string(),
                id: date.to_string(),
            })
    }

    async fn mark_limit_reached(&self, date: NaiveDate) -> Result<()> {
        let row = ApiUsageActiveModel {
            id: NotSet,
            date: Set(date),
            limit_reached: Set(true),
        };

        // Concurrent workers discovering the limit converge on the same row.
        ApiUsageEntity::insert(row)
            .on_conflict(
                OnConflict::column(ApiUsageColumn::Date)
                    .update_column(ApiUsageColumn::LimitReached)
                    .to_owned(),
            )
            .exec_without_returning(self.conn())
            .await?;

        Ok(())
    }
}

// ========================================================================
// Companies, Trackers and Statements
// ========================================================================

#[async_trait]
impl FinancialStore for Repository {
    async fn insert_companies(&self, companies: Vec<NewCompany>) -> Result<u64> {
        let mut inserted = 0;

        for chunk in companies.chunks(COMPANY_INSERT_CHUNK) {
            let rows = chunk.iter().map(|c| CompanyActiveModel {
                id: NotSet,
                name: Set(c.name.clone()),
                symbol: Set(c.symbol.clone()),
                cik: Set(None),
                image: Set(None),
                sector: Set(None),
                industry: Set(None),
                description: Set(None),
                ipo_date: Set(None),
            });

            inserted += CompanyEntity::insert_many(rows)
                .on_conflict(
                    OnConflict::column(CompanyColumn::Symbol)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(self.conn())
                .await?;
        }

        Ok(inserted)
    }

    async fn currencies(&self) -> Result<Vec<Currency>> {
        CurrencyEntity::find()
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn companies_due_for_fetch(&self, cutoff: NaiveDate) -> Result<Vec<CompanyRef>> {
        let rows = CompanyEntity::find()
            .find_also_related(CompanyDataTrackerEntity)
            .filter(
                Condition::any()
                    .add(CompanyDataTrackerColumn::LastFinancialReportFetch.is_null())
                    .add(CompanyDataTrackerColumn::LastFinancialReportFetch.lt(cutoff)),
            )
            .order_by_asc(CompanyColumn::Id)
            .all(self.conn())
            .await?;

        let missing: Vec<CompanyDataTrackerActiveModel> = rows
            .iter()
            .filter(|(_, tracker)| tracker.is_none())
            .map(|(company, _)| CompanyDataTrackerActiveModel {
                id: NotSet,
                company_id: Set(company.id),
                last_financial_report_fetch: Set(None),
            })
            .collect();

        if !missing.is_empty() {
            let created = CompanyDataTrackerEntity::insert_many(missing)
                .on_conflict(
                    OnConflict::column(CompanyDataTrackerColumn::CompanyId)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(self.conn())
                .await?;
            debug!(created, "Created missing company data trackers");
        }

        Ok(rows
            .into_iter()
            .map(|(company, _)| CompanyRef {
                company_id: company.id,
                symbol: company.symbol,
            })
            .collect())
    }

    async fn save_fetch_batch(
        &self,
        statements: Vec<NewFinancialStatement>,
        stamped: &[i64],
        fetched_on: NaiveDate,
    ) -> Result<BatchWriteSummary> {
        let txn = self.conn().begin().await?;
        let mut summary = BatchWriteSummary::default();

        if !statements.is_empty() {
            summary.statements_inserted = FinancialStatementEntity::insert_many(
                statements.into_iter().map(NewFinancialStatement::into_active_model),
            )
            .on_conflict(
                OnConflict::columns([
                    FinancialStatementColumn::CompanyId,
                    FinancialStatementColumn::DateReported,
                    FinancialStatementColumn::CalendarYear,
                    FinancialStatementColumn::Period,
                    FinancialStatementColumn::CurrencyId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
        }

        if !stamped.is_empty() {
            let trackers = stamped.iter().map(|company_id| CompanyDataTrackerActiveModel {
                id: NotSet,
                company_id: Set(*company_id),
                last_financial_report_fetch: Set(Some(fetched_on)),
            });

            summary.trackers_stamped = CompanyDataTrackerEntity::insert_many(trackers)
                .on_conflict(
                    OnConflict::column(CompanyDataTrackerColumn::CompanyId)
                        .update_column(CompanyDataTrackerColumn::LastFinancialReportFetch)
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;

        Ok(summary)
    }
}

// ========================================================================
// Analyses
// ========================================================================

#[async_trait]
impl AnalysisStore for Repository {
    async fn companies_needing_analysis(&self, cutoff: NaiveDate) -> Result<Vec<CompanyStatements>> {
        let company_ids: Vec<i64> = FinancialStatementEntity::find()
            .select_only()
            .column(FinancialStatementColumn::CompanyId)
            .distinct()
            .join(JoinType::LeftJoin, FinancialStatementRelation::Analysis.def())
            .filter(
                Condition::any()
                    .add(AnalysisColumn::Id.is_null())
                    .add(AnalysisColumn::LastModified.is_null())
                    .add(AnalysisColumn::LastModified.lt(cutoff)),
            )
            .order_by_asc(FinancialStatementColumn::CompanyId)
            .into_tuple()
            .all(self.conn())
            .await?;

        if company_ids.is_empty() {
            return Ok(Vec::new());
        }

        let companies = CompanyEntity::find()
            .filter(CompanyColumn::Id.is_in(company_ids.clone()))
            .order_by_asc(CompanyColumn::Id)
            .all(self.conn())
            .await?;

        let statements = FinancialStatementEntity::find()
            .filter(FinancialStatementColumn::CompanyId.is_in(company_ids))
            .order_by_asc(FinancialStatementColumn::CompanyId)
            .order_by_desc(FinancialStatementColumn::CalendarYear)
            .order_by_desc(FinancialStatementColumn::DateReported)
            .order_by_asc(FinancialStatementColumn::Id)
            .all(self.conn())
            .await?;

        let mut by_company: HashMap<i64, Vec<FinancialStatement>> = HashMap::new();
        for statement in statements {
            by_company
                .entry(statement.company_id)
                .or_default()
                .push(statement);
        }

        Ok(companies
            .into_iter()
            .map(|company| {
                let statements = by_company.remove(&company.id).unwrap_or_default();
                CompanyStatements {
                    company,
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

        // The embedding column is a pgvector type, so the upsert is raw SQL
        // with a cast on the vector literal.
        let mut sql = String::from(
            "INSERT INTO financial_statement_analyses \
             (financial_statement_id, analysis_text, embedding, last_modified) VALUES ",
        );
        let mut values: Vec<sea_orm::Value> = Vec::with_capacity(records.len() * 4);

        for (i, record) in records.into_iter().enumerate() {
            let base = i * 4;
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!(
                "(${}, ${}, ${}::vector, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4
            ));
            values.push(record.financial_statement_id.into());
            values.push(record.analysis_text.into());
            values.push(to_vector_literal(&record.embedding).into());
            values.push(modified_on.into());
        }

        sql.push_str(
            " ON CONFLICT (financial_statement_id) DO UPDATE SET \
             analysis_text = EXCLUDED.analysis_text, \
             embedding = EXCLUDED.embedding, \
             last_modified = EXCLUDED.last_modified",
        );

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        let result = self.conn().execute(stmt).await?;

        Ok(result.rows_affected())
    }
}

/// Postgres rejects an upsert that touches the same row twice; keep the last
/// record per statement.
pub(crate) fn dedupe_by_statement(records: Vec<NewAnalysis>) -> Vec<NewAnalysis> {
    let mut position: HashMap<i64, usize> = HashMap::new();
    let mut deduped: Vec<NewAnalysis> = Vec::with_capacity(records.len());

    for record in records {
        match position.get(&record.financial_statement_id) {
            Some(&i) => deduped[i] = record,
            None => {
                position.insert(record.financial_statement_id, deduped.len());
                deduped.push(record);
            }
        }
    }

    deduped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(statement_id: i64, text: &str) -> NewAnalysis {
        NewAnalysis {
            financial_statement_id: statement_id,
            analysis_text: text.to_string(),
            embedding: vec![0.0; 4],
        }
    }

    #[test]
    fn test_dedupe_keeps_last_record_in_first_position() {
        let deduped = dedupe_by_statement(vec![
            analysis(1, "old"),
            analysis(2, "other"),
            analysis(1, "new"),
        ]);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].financial_statement_id, 1);
        assert_eq!(deduped[0].analysis_text, "new");
        assert_eq!(deduped[1].financial_statement_id, 2);
    }
}
