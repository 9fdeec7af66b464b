//! Traits for embedding operations.

use crate::error::EmbeddingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an embedding model as far as vector compatibility goes.
///
/// Two embedders with equal fingerprints produce comparable vectors. The
/// semantic index persists the fingerprint it was built with and refuses to
/// open under a different one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingFingerprint {
    pub model_id: String,
    pub dimension: usize,
}

impl EmbeddingFingerprint {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
        }
    }
}

impl fmt::Display for EmbeddingFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}d", self.model_id, self.dimension)
    }
}

/// Trait for embedding model operations.
///
/// The same embedder must be used for ingestion and for queries; the engine
/// enforces this through [`Embedder::fingerprint`].
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: queries are embedded on blocking
/// worker threads while other threads index documents.
///
/// # Examples
///
/// ```
/// use briefsearch_core::embedding::{Embedder, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(128);
/// let embedding = embedder.embed("glycemic control in older adults").unwrap();
/// assert_eq!(embedding.len(), embedder.embedding_dim());
/// ```
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model weights/algorithm.
    fn model_id(&self) -> &str;

    /// Returns the embedding dimension (vector size).
    fn embedding_dim(&self) -> usize;

    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn fingerprint(&self) -> EmbeddingFingerprint {
        EmbeddingFingerprint::new(self.model_id(), self.embedding_dim())
    }
}
