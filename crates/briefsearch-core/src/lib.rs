//! # Briefsearch Core
//!
//! Hybrid lexical + semantic search over clinical research briefs.
//!
//! This crate holds the indexes, fusion and reranking logic used by the
//! briefsearch frontends. Every document lives in two indexes (BM25 and HNSW)
//! that are kept in lockstep; queries hit both concurrently and the rankings
//! are merged with Reciprocal Rank Fusion.
//!
//! ## Modules
//!
//! - [`search`] - Hybrid search (BM25 keyword + HNSW vector + RRF fusion + reranking)
//! - [`storage`] - Byte-level persistence for each index
//! - [`config`] - Engine configuration and its defaults
//! - [`error`] - Error types for embedding and reranking
//! - [`embedding`] - Text to vector abstractions
//! - [`metrics`] - Performance metrics collection with rolling averages

pub mod config;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod search;
pub mod storage;

#[doc(hidden)]
pub mod test_utils;
