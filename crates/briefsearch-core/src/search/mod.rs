//! Hybrid search over clinical research briefs.
//!
//! Two independent retrieval channels rank the same corpus:
//! - **Lexical** (BM25 over title and abstract)
//! - **Semantic** (HNSW over abstract embeddings)
//!
//! Their rankings are merged with Reciprocal Rank Fusion and the fused top
//! candidates are optionally reranked.
//!
//! # Architecture
//!
//! - `types`: Core types (DocId, Document, RankedHit, SearchResult, SearchError)
//! - `channel`: The [`SearchIndex`] trait both channels implement
//! - `keyword`: BM25 lexical index
//! - `vector`: HNSW semantic index
//! - `document_store`: Keeps the two indexes in lockstep on every write
//! - `fusion`: Reciprocal Rank Fusion
//! - `rerank`: Pairwise rerankers and the fallback-aware rerank step
//! - `engine`: [`HybridSearchEngine`] orchestrating all of the above
//!
//! # Usage
//!
//! ```no_run
//! use briefsearch_core::config::SearchConfig;
//! use briefsearch_core::embedding::HashingEmbedder;
//! use briefsearch_core::search::{Document, HybridSearchEngine};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), briefsearch_core::search::SearchError> {
//! let engine = HybridSearchEngine::new(SearchConfig::default(), Arc::new(HashingEmbedder::default()))?;
//! engine
//!     .add_document(Document::new(
//!         "pmid-1",
//!         "Glycemic targets",
//!         "glycemic control targets for elderly diabetic patients",
//!     ))
//!     .await?;
//!
//! for result in engine.search("diabetes elderly", 5).await? {
//!     println!("{} {:.4}", result.id(), result.fused_score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Algorithm Details
//!
//! **Reciprocal Rank Fusion**:
//! - Formula: `score = Σ 1 / (k + rank)` over the channels that returned the
//!   document, with `k = 60` and 1-based ranks
//! - Ties go to the better individual rank, then to the smaller id

pub mod types;

mod channel;
mod document_store;
mod engine;
mod rerank;

// Exposed for benchmarking but hidden from docs
#[doc(hidden)]
pub mod fusion;
#[doc(hidden)]
pub mod keyword;
#[doc(hidden)]
pub mod vector;

pub use types::{
    validate_dimension, Channel, CompactionStats, ConsistencyReport, DocId, Document, FusedHit,
    IndexManifest, IndexStats, IndexingStage, RankedHit, SearchError, SearchResult, SourceType,
};

pub use channel::{DocumentLookup, IndexEntry, SearchIndex};
pub use document_store::DocumentStore;
pub use engine::HybridSearchEngine;
pub use fusion::{reciprocal_rank_fusion, RRF_K};
pub use keyword::LexicalIndex;
pub use rerank::{rerank_candidates, rerank_text, Reranker, TermOverlapReranker};
pub use vector::SemanticIndex;

#[cfg(feature = "cross-encoder")]
pub use rerank::CrossEncoderReranker;
