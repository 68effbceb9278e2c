//! FinVantage Common Library
//!
//! Shared code for the FinVantage pipeline services including:
//! - Database entities, store traits and repositories
//! - Embedding client abstraction
//! - Job queues and the consume loop
//! - Retry policy for outbound calls
//! - Error types and handling
//! - Configuration management
//! - Metrics and tracing setup

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use retry::{RetryPolicy, Retryable};

use chrono::{Months, NaiveDate};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "mistral-embed";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;

/// Records older than this cutoff are stale. Falls back to the earliest
/// representable date when the subtraction underflows.
pub fn staleness_cutoff(today: NaiveDate, months: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_cutoff_is_one_year_back() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            staleness_cutoff(today, 12),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap()
        );
    }
}
