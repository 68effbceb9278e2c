//! Daily quota tracking for the financial data API

use chrono::NaiveDate;
use finvantage_common::db::ApiUsageStore;
use finvantage_common::errors::Result;
use finvantage_common::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Single source of truth for "may we call the API today"
#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn ApiUsageStore>,
    paid_plan: bool,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn ApiUsageStore>, paid_plan: bool) -> Self {
        Self { store, paid_plan }
    }

    pub fn paid_plan(&self) -> bool {
        self.paid_plan
    }

    /// Whether calls are allowed on `today`.
    ///
    /// Creates today's usage record when absent. A paid plan is always
    /// usable, whatever the record says.
    pub async fn is_usable(&self, today: NaiveDate) -> Result<bool> {
        let usage = self.store.usage_for(today).await?;

        if self.paid_plan {
            return Ok(true);
        }

        if usage.limit_reached {
            debug!(%today, "API limit reached for today");
        }
        Ok(!usage.limit_reached)
    }

    /// Record that today's quota is used up
    pub async fn mark_exhausted(&self, today: NaiveDate, source: &'static str) -> Result<()> {
        warn!(%today, source, "API limit reached, marking today's usage as exhausted");
        metrics::record_quota_exhausted(source);
        self.store.mark_limit_reached(today).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finvantage_common::db::MemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test]
    async fn test_first_call_creates_default_record() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaTracker::new(store.clone(), false);

        assert!(store.usage(today()).is_none());
        assert!(tokio_test::assert_ok!(quota.is_usable(today()).await));

        let usage = store.usage(today()).unwrap();
        assert!(!usage.limit_reached);
    }

    #[tokio::test]
    async fn test_exhausted_day_is_not_usable() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaTracker::new(store.clone(), false);

        quota.mark_exhausted(today(), "test").await.unwrap();

        assert!(!quota.is_usable(today()).await.unwrap());
        let tomorrow = today().succ_opt().unwrap();
        assert!(quota.is_usable(tomorrow).await.unwrap());
    }

    #[tokio::test]
    async fn test_paid_plan_overrides_stored_state() {
        let store = Arc::new(MemoryStore::new());
        store.mark_limit_reached(today()).await.unwrap();

        let quota = QuotaTracker::new(store.clone(), true);
        assert!(quota.is_usable(today()).await.unwrap());
        assert!(store.usage(today()).unwrap().limit_reached);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_writes(1);
        let quota = QuotaTracker::new(store, false);

        tokio_test::assert_err!(quota.is_usable(today()).await);
    }
}
