//! Configuration management for FinVantage services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// External financial data API
    #[serde(default)]
    pub financial_api: FinancialApiConfig,

    /// Retry policy for outbound calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Queue configuration (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Scheduling and batching knobs
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinancialApiConfig {
    /// API base URL, e.g. https://financialmodelingprep.com/api/v3
    #[serde(default = "default_financial_api_url")]
    pub base_url: String,

    /// API key sent as the `apikey` query parameter
    #[serde(default)]
    pub api_key: String,

    /// Paid plans have a per-minute limit instead of a daily one
    #[serde(default)]
    pub paid_plan: bool,

    /// Exchanges whose symbols are synced into the company registry
    #[serde(default = "default_stock_exchanges")]
    pub stock_exchanges: Vec<String>,

    /// Minimum spacing between two outgoing requests
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Pause after a 429 on a paid plan
    #[serde(default = "default_quota_cooldown")]
    pub quota_cooldown_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub max_delay_ms: u64,

    /// Randomize backoff delays by +/-50%
    #[serde(default)]
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai-compatible HTTP or mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Provider calls in flight per job
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS queue URL for `fetch-financial-report`
    pub fetch_queue_url: Option<String>,

    /// SQS queue URL for `financial-sentences`
    pub sentences_queue_url: Option<String>,

    /// Dead letter queue URL
    pub dlq_url: Option<String>,

    /// Maximum messages to receive per poll. Received messages are handled
    /// one after another, so all of them must finish within the visibility timeout.
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: i32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: i32,

    /// Visibility timeout in seconds. Must exceed the longest job: a full
    /// fetch batch where every company exhausts its retries and cools down.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: i32,
}

/// Which companies of a fetch batch get their freshness tracker stamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StampPolicy {
    /// Every company that was attempted, whether or not it yielded statements.
    /// The tracker then records "we tried today", not "we found data".
    #[default]
    AllAttempted,
    /// Only companies that contributed at least one parsed statement.
    OnlyWithStatements,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_batch_size")]
    pub fetch_batch_size: usize,

    #[serde(default = "default_pipeline_batch_size")]
    pub embedding_batch_size: usize,

    /// Age after which statements and analyses are refreshed
    #[serde(default = "default_staleness_months")]
    pub staleness_months: u32,

    #[serde(default)]
    pub stamp_policy: StampPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_financial_api_url() -> String { "https://financialmodelingprep.com/api/v3".to_string() }
fn default_stock_exchanges() -> Vec<String> { vec!["NASDAQ".to_string(), "NYSE".to_string()] }
fn default_pacing_ms() -> u64 { 500 }
fn default_quota_cooldown() -> u64 { 70 }
fn default_api_timeout() -> u64 { 30 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_initial_delay() -> u64 { 4_000 }
fn default_retry_max_delay() -> u64 { 10_000 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_concurrency() -> usize { 1 }
fn default_queue_batch_size() -> i32 { 1 }
fn default_queue_poll_timeout() -> i32 { 20 }
fn default_visibility_timeout() -> i32 { 3600 }
fn default_pipeline_batch_size() -> usize { 20 }
fn default_staleness_months() -> u32 { 12 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "finvantage".to_string() }

impl Default for FinancialApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_financial_api_url(),
            api_key: String::new(),
            paid_plan: false,
            stock_exchanges: default_stock_exchanges(),
            pacing_ms: default_pacing_ms(),
            quota_cooldown_secs: default_quota_cooldown(),
            timeout_secs: default_api_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_retry_initial_delay(),
            max_delay_ms: default_retry_max_delay(),
            jitter: false,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            concurrency: default_embedding_concurrency(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fetch_queue_url: None,
            sentences_queue_url: None,
            dlq_url: None,
            batch_size: default_queue_batch_size(),
            poll_timeout_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: default_pipeline_batch_size(),
            embedding_batch_size: default_pipeline_batch_size(),
            staleness_months: default_staleness_months(),
            stamp_policy: StampPolicy::default(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__FINANCIAL_API__PAID_PLAN=true
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("financial_api.stock_exchanges")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl FinancialApiConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_secs(self.quota_cooldown_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetryConfig {
    /// Build the shared retry policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: 2.0,
            jitter: self.jitter,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/finvantage".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            financial_api: FinancialApiConfig::default(),
            retry: RetryConfig::default(),
            embedding: EmbeddingConfig::default(),
            queue: QueueConfig::default(),
            pipeline: PipelineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.model, "mistral-embed");
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.pipeline.fetch_batch_size, 20);
        assert_eq!(config.pipeline.stamp_policy, StampPolicy::AllAttempted);
        assert!(!config.financial_api.paid_plan);
    }

    #[test]
    fn test_queue_defaults_receive_one_job_at_a_time() {
        let queue: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(queue.batch_size, 1);
        assert_eq!(queue.visibility_timeout_secs, 3600);

        let pipeline = PipelineConfig::default();
        let retry = RetryConfig::default();
        let worst_case_job = pipeline.fetch_batch_size as u64
            * (FinancialApiConfig::default().quota_cooldown_secs
                + retry.max_attempts as u64 * retry.max_delay_ms / 1000);
        assert!((queue.visibility_timeout_secs as u64) > worst_case_job);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(4));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_stamp_policy_deserializes_snake_case() {
        let policy: StampPolicy = serde_json::from_str("\"only_with_statements\"").unwrap();
        assert_eq!(policy, StampPolicy::OnlyWithStatements);
    }
}
