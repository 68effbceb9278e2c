//! Database layer for FinVantage
//!
//! Provides:
//! - SeaORM entity models
//! - Store traits consumed by schedulers and workers
//! - Repository (Postgres) and in-process store implementations
//! - Connection pool management

pub mod memory;
pub mod models;
mod repository;
pub mod store;

pub use memory::MemoryStore;
pub use repository::Repository;
pub use store::{
    AnalysisStore, ApiUsageStore, BatchWriteSummary, CompanyRef, CompanyStatements,
    FinancialStore, NewCompany,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    connection: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let connection = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { connection })
    }

    /// Wrap an existing connection
    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.connection
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;

        Ok(())
    }
}
