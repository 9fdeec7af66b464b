//! Search configuration.
//!
//! [`SearchConfig`] is passed explicitly to the engine at construction time.
//! There is no global or ambient configuration: two engines in one process can
//! run with different settings.
//!
//! # Usage
//!
//! ```
//! use briefsearch_core::config::{SearchConfig, DEFAULT_RRF_K};
//!
//! let config = SearchConfig {
//!     default_top_k: 5,
//!     ..SearchConfig::default()
//! };
//! assert_eq!(config.rrf_k, DEFAULT_RRF_K);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Fusion
// =============================================================================

/// RRF smoothing constant.
///
/// Dampens the contribution of top ranks so one channel's first hit cannot
/// dominate the fused order on its own.
pub const DEFAULT_RRF_K: u32 = 60;

/// Each channel is asked for `top_k * CANDIDATE_MULTIPLIER` hits.
pub const DEFAULT_CANDIDATE_MULTIPLIER: usize = 2;

// =============================================================================
// Retrieval
// =============================================================================

/// Results returned by a search when the caller does not say otherwise.
pub const DEFAULT_TOP_K: usize = 10;

/// Semantic hits at or below this cosine similarity are dropped.
pub const DEFAULT_MIN_SEMANTIC_SIMILARITY: f32 = 0.0;

/// Embedding dimension of the built-in hashing embedder.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

// =============================================================================
// Reranking
// =============================================================================

/// Characters of abstract text handed to the reranker per candidate.
pub const DEFAULT_RERANK_MAX_CHARS: usize = 512;

// =============================================================================
// Deadlines
// =============================================================================

pub const DEFAULT_CHANNEL_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_RERANK_TIMEOUT_MS: u64 = 5_000;

/// Bounded wait for exclusive access to the indexes before a write gives up.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Maintenance
// =============================================================================

/// Tombstone ratio above which the semantic graph is rebuilt.
pub const DEFAULT_COMPACTION_THRESHOLD: f32 = 0.3;

/// Invalid configuration value.
#[derive(Debug, Clone, Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Tunables for the hybrid search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// RRF constant `k` in `1 / (k + rank)`.
    pub rrf_k: u32,
    /// Per-channel candidate depth as a multiple of the requested `top_k`.
    pub candidate_multiplier: usize,
    /// Result count used when callers pass no explicit `top_k`.
    pub default_top_k: usize,
    /// Semantic hits with similarity `<=` this value are discarded.
    pub min_semantic_similarity: f32,
    /// Abstract prefix length (in chars) scored by the reranker.
    pub rerank_max_chars: usize,
    /// Bounded wait for each retrieval channel.
    pub channel_timeout_ms: u64,
    /// Bounded wait for the reranker.
    pub rerank_timeout_ms: u64,
    /// Bounded wait for the write lock.
    pub write_timeout_ms: u64,
    /// Tombstone ratio that triggers semantic index compaction.
    pub compaction_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
            default_top_k: DEFAULT_TOP_K,
            min_semantic_similarity: DEFAULT_MIN_SEMANTIC_SIMILARITY,
            rerank_max_chars: DEFAULT_RERANK_MAX_CHARS,
            channel_timeout_ms: DEFAULT_CHANNEL_TIMEOUT_MS,
            rerank_timeout_ms: DEFAULT_RERANK_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

impl SearchConfig {
    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidate_multiplier == 0 {
            return Err(ConfigError(
                "candidate_multiplier must be at least 1".to_string(),
            ));
        }
        if self.default_top_k == 0 {
            return Err(ConfigError("default_top_k must be at least 1".to_string()));
        }
        if !(-1.0..1.0).contains(&self.min_semantic_similarity) {
            return Err(ConfigError(format!(
                "min_semantic_similarity must be in [-1, 1), got {}",
                self.min_semantic_similarity
            )));
        }
        if self.rerank_max_chars == 0 {
            return Err(ConfigError(
                "rerank_max_chars must be at least 1".to_string(),
            ));
        }
        if self.channel_timeout_ms == 0 || self.rerank_timeout_ms == 0 || self.write_timeout_ms == 0
        {
            return Err(ConfigError("timeouts must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.compaction_threshold) {
            return Err(ConfigError(format!(
                "compaction_threshold must be in [0, 1], got {}",
                self.compaction_threshold
            )));
        }
        Ok(())
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Number of hits requested from each channel for a search of `top_k`.
    pub fn candidate_depth(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.candidate_multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rrf_k, 60);
        assert_eq!(config.candidate_multiplier, 2);
    }

    #[test]
    fn test_candidate_depth() {
        let config = SearchConfig::default();
        assert_eq!(config.candidate_depth(10), 20);
        assert_eq!(config.candidate_depth(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_rejects_zero_multiplier() {
        let config = SearchConfig {
            candidate_multiplier: 0,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let config = SearchConfig {
            compaction_threshold: 1.5,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_write_timeout() {
        let config = SearchConfig {
            write_timeout_ms: 0,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SearchConfig = serde_json::from_str(r#"{"rrf_k": 30}"#).unwrap();
        assert_eq!(config.rrf_k, 30);
        assert_eq!(config.default_top_k, DEFAULT_TOP_K);
        assert_eq!(config.channel_timeout(), Duration::from_millis(2_000));
        assert_eq!(config.write_timeout(), Duration::from_millis(30_000));
    }
}
