//! Embedding model abstractions and implementations.
//!
//! ## Core Traits
//!
//! - [`Embedder`] - Text to fixed-length vector
//! - [`EmbeddingFingerprint`] - Model identity used to detect incompatible indexes
//!
//! ## Implementations
//!
//! - [`HashingEmbedder`] - Deterministic feature hashing, no model files
//! - `FastembedEmbedder` - all-MiniLM-L6-v2 sentence embeddings (feature `neural-embedder`)
//!
//! Other models plug in by implementing [`Embedder`].

mod hashing;
#[cfg(feature = "neural-embedder")]
mod minilm;
mod traits;

pub use hashing::HashingEmbedder;
#[cfg(feature = "neural-embedder")]
pub use minilm::FastembedEmbedder;
pub use traits::{Embedder, EmbeddingFingerprint};
