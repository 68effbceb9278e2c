//! Error types for FinVantage services
//!
//! A shared `AppError` for storage, queue, embedding and configuration failures.

use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_resource() {
        let err = AppError::NotFound {
            resource_type: "company".into(),
            id: "42".into(),
        };
        assert_eq!(err.to_string(), "Resource not found: company with id 42");
    }
}
