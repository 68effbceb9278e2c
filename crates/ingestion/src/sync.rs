//! Company listing sync
//!
//! Pulls the full stock list and registers companies traded on the
//! configured exchanges.

use crate::client::{FinancialDataClient, StockListing};
use crate::errors::ApiError;
use crate::quota::QuotaTracker;
use chrono::NaiveDate;
use finvantage_common::db::{FinancialStore, NewCompany};
use finvantage_common::metrics;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Longest symbol the companies table accepts
const MAX_SYMBOL_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    /// Quota already exhausted before the run
    Skipped,
    /// The listing call hit the quota
    QuotaExhausted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub listed: usize,
    pub eligible: usize,
    pub inserted: u64,
}

impl SyncReport {
    fn ended(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            listed: 0,
            eligible: 0,
            inserted: 0,
        }
    }
}

pub struct CompanySync {
    client: Arc<FinancialDataClient>,
    quota: QuotaTracker,
    store: Arc<dyn FinancialStore>,
    exchanges: HashSet<String>,
}

impl CompanySync {
    pub fn new(
        client: Arc<FinancialDataClient>,
        quota: QuotaTracker,
        store: Arc<dyn FinancialStore>,
        exchanges: &[String],
    ) -> Self {
        Self {
            client,
            quota,
            store,
            exchanges: exchanges.iter().map(|e| e.trim().to_ascii_uppercase()).collect(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, today: NaiveDate) -> SyncReport {
        info!("Starting company sync");

        match self.quota.is_usable(today).await {
            Ok(true) => {}
            Ok(false) => {
                info!("API limit reached for today, skipping sync");
                return SyncReport::ended(SyncOutcome::Skipped);
            }
            Err(e) => {
                error!(error = %e, "Failed to read API usage");
                return SyncReport::ended(SyncOutcome::Failed);
            }
        }

        let listings = match self.client.stock_list().await {
            Ok(listings) => listings,
            Err(ApiError::QuotaExceeded) => {
                // Marked regardless of plan
                if let Err(e) = self.quota.mark_exhausted(today, "sync").await {
                    error!(error = %e, "Failed to mark API usage as exhausted");
                }
                return SyncReport::ended(SyncOutcome::QuotaExhausted);
            }
            Err(e) => {
                error!(error = %e, "Error fetching companies list, stopping");
                return SyncReport::ended(SyncOutcome::Failed);
            }
        };

        let listed = listings.len();
        let companies = self.eligible(listings);
        let eligible = companies.len();

        let inserted = match self.store.insert_companies(companies).await {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(error = %e, "Failed to insert companies");
                return SyncReport {
                    outcome: SyncOutcome::Failed,
                    listed,
                    eligible,
                    inserted: 0,
                };
            }
        };

        metrics::record_companies_synced(inserted);
        if inserted > 0 {
            info!(inserted, listed, eligible, "Inserted new companies");
        } else {
            info!(listed, eligible, "No new companies were inserted");
        }

        SyncReport {
            outcome: SyncOutcome::Completed,
            listed,
            eligible,
            inserted,
        }
    }

    /// Listings on an allowed exchange with a usable symbol and name
    fn eligible(&self, listings: Vec<StockListing>) -> Vec<NewCompany> {
        listings
            .into_iter()
            .filter(|l| {
                l.exchange_short_name
                    .as_deref()
                    .map_or(false, |e| self.exchanges.contains(&e.trim().to_ascii_uppercase()))
            })
            .filter_map(|l| {
                let symbol = l.symbol?.trim().to_string();
                let name = l.name?.trim().to_string();
                let valid = !symbol.is_empty() && symbol.len() <= MAX_SYMBOL_LEN && !name.is_empty();
                valid.then_some(NewCompany { name, symbol })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{fast_retry, test_config};
    use finvantage_common::db::MemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn sync(server: &MockServer, store: Arc<MemoryStore>) -> CompanySync {
        let client = FinancialDataClient::new(&test_config(&server.uri()), fast_retry()).unwrap();
        CompanySync::new(
            Arc::new(client),
            QuotaTracker::new(store.clone(), false),
            store,
            &["NASDAQ".to_string(), "NYSE".to_string()],
        )
    }

    #[tokio::test]
    async fn test_sync_filters_exchanges_and_ignores_known_symbols() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {"symbol": "AAPL", "name": "Apple Inc.", "exchangeShortName": "NASDAQ"},
                    {"symbol": "IBM", "name": "IBM", "exchangeShortName": "NYSE"},
                    {"symbol": "SAP.DE", "name": "SAP SE", "exchangeShortName": "XETRA"},
                    {"symbol": "NONAME", "exchangeShortName": "NYSE"},
                    {"symbol": "WAYTOOLONGSYMBOL", "name": "Long", "exchangeShortName": "NYSE"}
                ]"#,
            ))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.add_company("Apple Inc.", "AAPL");

        let report = sync(&server, store.clone()).run(today()).await;

        assert_eq!(report.outcome, SyncOutcome::Completed);
        assert_eq!(report.listed, 5);
        assert_eq!(report.eligible, 2);
        assert_eq!(report.inserted, 1);

        let symbols: Vec<String> = store.companies().into_iter().map(|c| c.symbol).collect();
        assert_eq!(symbols, vec!["AAPL".to_string(), "IBM".to_string()]);
    }

    #[tokio::test]
    async fn test_quota_response_marks_day_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let report = sync(&server, store.clone()).run(today()).await;

        assert_eq!(report.outcome, SyncOutcome::QuotaExhausted);
        assert!(store.usage(today()).unwrap().limit_reached);
        assert!(store.companies().is_empty());
    }
}
