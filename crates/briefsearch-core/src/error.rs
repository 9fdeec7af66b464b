//! Error types for briefsearch-core.
//!
//! Search and indexing errors live in [`crate::search::SearchError`]; storage
//! errors in [`crate::storage::StoreError`]. This module holds the errors of the
//! pluggable models: embedders and rerankers.

use thiserror::Error;

/// Errors that can occur while computing an embedding.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Input text cannot be embedded
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Model forward pass failed
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    /// Model not loaded or failed to initialize
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    /// Model produced a vector of the wrong length
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors that can occur while scoring (query, document) pairs.
#[derive(Debug, Clone, Error)]
pub enum RerankError {
    /// Model not loaded or failed to initialize
    #[error("Reranker model unavailable: {0}")]
    ModelUnavailable(String),
    /// Scoring call failed
    #[error("Reranking failed: {0}")]
    InferenceFailed(String),
    /// Model returned a different number of scores than documents given
    #[error("Reranker returned {actual} scores for {expected} documents")]
    ScoreCountMismatch { expected: usize, actual: usize },
}

impl From<EmbeddingError> for String {
    fn from(err: EmbeddingError) -> String {
        err.to_string()
    }
}

impl From<RerankError> for String {
    fn from(err: RerankError) -> String {
        err.to_string()
    }
}
