//! Financial data API client with pacing and bounded retry.
//!
//! Every outgoing attempt waits on a pacing gate, so retries are paced too.
//! Transport errors and 5xx responses are retried with exponential backoff;
//! 429 is terminal and surfaces immediately as [`ApiError::QuotaExceeded`].

use crate::errors::{ApiError, IngestionError};
use finvantage_common::config::FinancialApiConfig;
use finvantage_common::metrics;
use finvantage_common::retry::{RetryError, RetryPolicy, Retryable};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Longest response body kept in error messages
const MAX_ERROR_BODY: usize = 512;

/// One entry of `GET /stock/list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StockListing {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub exchange_short_name: Option<String>,
}

/// Failure of a single attempt
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server error {status}: {body}")]
    Server { status: StatusCode, body: String },

    #[error("{0}")]
    Terminal(ApiError),
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Terminal(_))
    }
}

/// Client for the financial data API
pub struct FinancialDataClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    pacer: Option<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
}

impl FinancialDataClient {
    /// Create a client. A zero pacing interval disables the pacing gate.
    pub fn new(config: &FinancialApiConfig, retry: RetryPolicy) -> Result<Self, IngestionError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| IngestionError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            pacer: Quota::with_period(config.pacing()).map(RateLimiter::direct),
            retry,
        })
    }

    async fn pace(&self) {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }
    }

    /// GET `{base}/{path}` with the API key appended and decode the JSON body.
    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let endpoint = endpoint_label(path);

        let result = self
            .retry
            .run(endpoint, |attempt| {
                debug!(endpoint, attempt, "Calling financial data API");
                self.attempt(&url, query)
            })
            .await;

        let result = result.map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => ApiError::TransientFailure {
                attempts,
                message: last.to_string(),
            },
            RetryError::Aborted(AttemptError::Terminal(e)) => e,
            RetryError::Aborted(other) => ApiError::TransientFailure {
                attempts: 1,
                message: other.to_string(),
            },
        });

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_api_request(endpoint, outcome);

        result
    }

    async fn attempt(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, AttemptError> {
        self.pace().await;

        let response = self
            .http
            .get(url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Terminal(ApiError::QuotaExceeded));
        }
        if status.is_server_error() {
            let body = truncate(response.text().await.unwrap_or_default());
            return Err(AttemptError::Server { status, body });
        }
        if !status.is_success() {
            let body = truncate(response.text().await.unwrap_or_default());
            return Err(AttemptError::Terminal(ApiError::RequestRejected {
                status: status.as_u16(),
                body,
            }));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AttemptError::Terminal(ApiError::MalformedPayload(e.to_string())))
    }

    /// All listed securities
    pub async fn stock_list(&self) -> Result<Vec<StockListing>, ApiError> {
        let body = self.get_json("stock/list", &[]).await?;
        serde_json::from_value(body).map_err(|e| ApiError::MalformedPayload(e.to_string()))
    }

    /// Annual income statements of `symbol` as raw records.
    ///
    /// Records are parsed one by one later so a bad record does not
    /// invalidate the whole response.
    pub async fn income_statements(&self, symbol: &str) -> Result<Vec<Value>, ApiError> {
        let path = format!("income-statement/{}", symbol);
        match self.get_json(&path, &[("period", "annual")]).await? {
            Value::Array(records) => Ok(records),
            Value::Object(map) if map.contains_key("Error Message") => {
                Err(ApiError::RequestRejected {
                    status: StatusCode::OK.as_u16(),
                    body: truncate(Value::Object(map).to_string()),
                })
            }
            other => Err(ApiError::MalformedPayload(format!(
                "expected an array, got {}",
                truncate(other.to_string())
            ))),
        }
    }
}

fn endpoint_label(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn test_config(base_url: &str) -> FinancialApiConfig {
        FinancialApiConfig {
            base_url: base_url.to_string(),
            api_key: "secret".to_string(),
            pacing_ms: 0,
            quota_cooldown_secs: 0,
            ..FinancialApiConfig::default()
        }
    }

    pub(crate) fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
        }
    }

    fn client(server: &MockServer) -> FinancialDataClient {
        FinancialDataClient::new(&test_config(&server.uri()), fast_retry()).unwrap()
    }

    #[tokio::test]
    async fn test_income_statements_sends_key_and_period() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/income-statement/AAPL"))
            .and(query_param("period", "annual"))
            .and(query_param("apikey", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"symbol":"AAPL"}]"#))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server).income_statements("AAPL").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["symbol"], "AAPL");
    }

    #[tokio::test]
    async fn test_quota_exceeded_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).income_statements("AAPL").await.unwrap_err();
        assert!(matches!(err, ApiError::QuotaExceeded));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).income_statements("AAPL").await.unwrap_err();
        match err {
            ApiError::TransientFailure { attempts, message } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("bad gateway"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_one_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let records = client(&server).income_statements("MSFT").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_client_errors_are_rejected_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).income_statements("AAPL").await.unwrap_err();
        assert!(matches!(err, ApiError::RequestRejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).income_statements("AAPL").await.unwrap_err();
        assert!(matches!(err, ApiError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_stock_list_tolerates_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"symbol":"AAPL","name":"Apple Inc.","exchangeShortName":"NASDAQ","price":1.5},{"symbol":"X"}]"#,
            ))
            .mount(&server)
            .await;

        let listings = client(&server).stock_list().await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].exchange_short_name.as_deref(), Some("NASDAQ"));
        assert_eq!(listings[1].name, None);
    }

    #[test]
    fn test_pacing_gate_spaces_requests() {
        let mut config = test_config("http://localhost");
        config.pacing_ms = 500;
        let client = FinancialDataClient::new(&config, fast_retry()).unwrap();
        let pacer = client.pacer.as_ref().unwrap();

        assert!(pacer.check().is_ok());
        assert!(pacer.check().is_err());
    }

    #[test]
    fn test_endpoint_label() {
        assert_eq!(endpoint_label("/income-statement/AAPL"), "income-statement");
        assert_eq!(endpoint_label("stock/list"), "stock");
    }
}
