//! Ingestion service error types

use finvantage_common::errors::AppError;
use thiserror::Error;

/// Failure of a financial data API call, after retries
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP 429. Never retried.
    #[error("Daily API quota exceeded")]
    QuotaExceeded,

    #[error("Request rejected with status {status}: {body}")]
    RequestRejected { status: u16, body: String },

    #[error("Transient failure after {attempts} attempts: {message}")]
    TransientFailure { attempts: u32, message: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl ApiError {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::QuotaExceeded => "quota_exceeded",
            ApiError::RequestRejected { .. } => "request_rejected",
            ApiError::TransientFailure { .. } => "transient_failure",
            ApiError::MalformedPayload(_) => "malformed_payload",
        }
    }
}

/// Why a single income statement record was dropped
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record is not a JSON object")]
    NotAnObject,

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Unknown reported currency '{0}'")]
    UnknownCurrency(String),

    #[error("Invalid date '{0}'")]
    InvalidDate(String),

    #[error("Invalid period '{0}'")]
    InvalidPeriod(String),

    #[error("Invalid calendar year '{0}'")]
    InvalidYear(String),

    #[error("Invalid amount for '{field}': {value}")]
    InvalidAmount { field: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Financial API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    App(#[from] AppError),
}
