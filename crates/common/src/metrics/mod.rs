//! Metrics and observability utilities
//!
//! Prometheus metrics for the ingestion and embedding pipeline with
//! standardized naming conventions.

use crate::errors::{AppError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Metrics prefix for all FinVantage metrics
pub const METRICS_PREFIX: &str = "finvantage";

/// Buckets for outbound calls (financial API, embedding provider)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Buckets for whole-job handling, which includes pacing and backoff sleeps
pub const JOB_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Install the Prometheus exporter. A port of 0 leaves metrics unexported.
pub fn install_exporter(port: u16) -> Result<()> {
    if port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let to_config_error = |e: metrics_exporter_prometheus::BuildError| AppError::Configuration {
        message: format!("Failed to install metrics exporter: {}", e),
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            UPSTREAM_BUCKETS,
        )
        .map_err(to_config_error)?
        .set_buckets_for_metric(Matcher::Suffix("job_duration_seconds".to_string()), JOB_BUCKETS)
        .map_err(to_config_error)?
        .install()
        .map_err(to_config_error)?;

    register_metrics();
    tracing::info!(%addr, "Metrics exporter listening");

    Ok(())
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Financial data API
    describe_counter!(
        format!("{}_api_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Financial data API calls by endpoint and outcome"
    );

    describe_counter!(
        format!("{}_quota_exhausted_total", METRICS_PREFIX),
        Unit::Count,
        "Daily quota exhaustion events"
    );

    // Ingestion
    describe_counter!(
        format!("{}_companies_synced_total", METRICS_PREFIX),
        Unit::Count,
        "Companies inserted by the listing sync"
    );

    describe_counter!(
        format!("{}_statements_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Financial statements inserted"
    );

    describe_counter!(
        format!("{}_fetch_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Per-company fetch failures by kind"
    );

    // Embedding
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_analyses_written_total", METRICS_PREFIX),
        Unit::Count,
        "Statement analyses upserted"
    );

    // Queue
    describe_counter!(
        format!("{}_jobs_dispatched_total", METRICS_PREFIX),
        Unit::Count,
        "Jobs enqueued by queue"
    );

    describe_counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Jobs handled by queue and outcome"
    );

    describe_histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Job handling latency in seconds"
    );
}

/// Helper to record a financial data API call
pub fn record_api_request(endpoint: &str, outcome: &'static str) {
    counter!(
        format!("{}_api_requests_total", METRICS_PREFIX),
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_quota_exhausted(source: &'static str) {
    counter!(
        format!("{}_quota_exhausted_total", METRICS_PREFIX),
        "source" => source
    )
    .increment(1);
}

pub fn record_companies_synced(count: u64) {
    counter!(format!("{}_companies_synced_total", METRICS_PREFIX)).increment(count);
}

pub fn record_statements_ingested(count: u64) {
    counter!(format!("{}_statements_ingested_total", METRICS_PREFIX)).increment(count);
}

pub fn record_fetch_failure(kind: &'static str) {
    counter!(
        format!("{}_fetch_failures_total", METRICS_PREFIX),
        "kind" => kind
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding_request(model: &str, success: bool, elapsed: Duration) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_request_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(elapsed.as_secs_f64());
    }
}

pub fn record_analyses_written(count: u64) {
    counter!(format!("{}_analyses_written_total", METRICS_PREFIX)).increment(count);
}

pub fn record_job_dispatched(queue: &'static str) {
    counter!(
        format!("{}_jobs_dispatched_total", METRICS_PREFIX),
        "queue" => queue
    )
    .increment(1);
}

/// Helper to record the outcome of one consumed job
pub fn record_job_processed(queue: &'static str, outcome: &'static str, elapsed: Duration) {
    counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        "queue" => queue,
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        "queue" => queue
    )
    .record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted() {
        for buckets in [UPSTREAM_BUCKETS, JOB_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper is a no-op
        record_api_request("income-statement", "success");
        record_job_processed("financial-sentences", "completed", Duration::from_millis(5));
        assert!(install_exporter(0).is_ok());
    }
}
