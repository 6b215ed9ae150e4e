//! Dense-vector retrieval leg: approximate-nearest-neighbor search over
//! unit vectors with cosine similarity.

mod index;

pub use index::HnswVectorIndex;

use async_trait::async_trait;
use thiserror::Error;

/// Result type for vector index operations
pub type VectorResult<T> = std::result::Result<T, VectorError>;

/// Errors that can occur in the vector index
#[derive(Debug, Error)]
pub enum VectorError {
    /// Vector has the wrong dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector is not unit length
    #[error("Vector is not unit length (norm {norm})")]
    NotUnitLength { norm: f32 },

    /// Search execution failed
    #[error("Vector search failed: {0}")]
    SearchFailed(String),

    /// Write failed
    #[error("Vector upsert failed: {0}")]
    UpsertFailed(String),
}

impl From<VectorError> for crate::error::AppError {
    fn from(err: VectorError) -> Self {
        crate::error::AppError::Internal(err.to_string())
    }
}

/// A nearest-neighbor hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Vector store seam. The engine treats the implementation as a
/// thread-safe service; tests substitute stubs for degradation scenarios.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Embedding dimension this index accepts
    fn dimension(&self) -> usize;

    /// Number of live (non-superseded) entries
    fn len(&self) -> usize;

    /// Whether the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the index is reachable (health checks)
    fn check_connection(&self) -> bool;

    /// Insert or replace the vector stored for `id`
    async fn upsert(&self, id: &str, vector: &[f32]) -> VectorResult<()>;

    /// k-nearest-neighbor search, sorted by similarity descending
    async fn search(&self, vector: &[f32], k: usize) -> VectorResult<Vec<VectorHit>>;
}
