use crate::error::AppError;

/// Result type for lexical index operations
pub type LexicalResult<T> = std::result::Result<T, LexicalError>;

/// Errors that can occur in the lexical index
#[derive(Debug, thiserror::Error)]
pub enum LexicalError {
    /// Index initialization failed
    #[error("Index initialization failed: {0}")]
    IndexInitFailed(String),

    /// Document indexing failed
    #[error("Document indexing failed: {0}")]
    IndexingFailed(String),

    /// Search execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),

    /// Document is missing a required field
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    TantivyError(String),
}

impl From<tantivy::TantivyError> for LexicalError {
    fn from(err: tantivy::TantivyError) -> Self {
        LexicalError::TantivyError(err.to_string())
    }
}

impl From<LexicalError> for AppError {
    fn from(err: LexicalError) -> Self {
        match err {
            LexicalError::InvalidDocument(msg) => AppError::Validation(msg),
            LexicalError::IoError(err) => AppError::Internal(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
