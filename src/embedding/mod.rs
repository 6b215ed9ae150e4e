//! Embedding provider: maps text to fixed-dimension unit vectors.
//!
//! The encoder itself is pluggable behind [`TextEncoder`]; the provider adds
//! batching, an LRU cache, lazy initialization, and input truncation.

mod encoder;
mod provider;

pub use encoder::{HashedNgramEncoder, TextEncoder};
pub use provider::EmbeddingProvider;

use thiserror::Error;

/// Result type for embedding operations
pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur while producing embeddings
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Encoder failed to load
    #[error("Encoder initialization failed: {0}")]
    InitFailed(String),

    /// Encoding a batch failed
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Encoder produced a vector of the wrong dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Encoder produced a zero vector that cannot be normalized
    #[error("Encoder produced a zero vector for input")]
    ZeroVector,
}

impl From<EmbeddingError> for crate::error::AppError {
    fn from(err: EmbeddingError) -> Self {
        crate::error::AppError::Internal(err.to_string())
    }
}
