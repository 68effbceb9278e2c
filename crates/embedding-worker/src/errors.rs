//! Error types for the embedding worker

use finvantage_common::errors::AppError;
use thiserror::Error;

/// Why one company's sentences produced no analysis records
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(#[from] AppError),

    #[error("Provider returned {got} vectors for {expected} sentences")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Provider returned a {got}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbeddingError {
    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingError::EmbeddingFailed(_) => "provider",
            EmbeddingError::LengthMismatch { .. } => "length_mismatch",
            EmbeddingError::DimensionMismatch { .. } => "dimension_mismatch",
        }
    }
}
