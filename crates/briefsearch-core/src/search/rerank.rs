//! Pairwise (query, document) reranking of the fused top candidates.
//!
//! Reranking is a refinement: callers fall back to the fused order whenever a
//! [`Reranker`] errors, panics or runs out of time.

use super::types::SearchResult;
use crate::error::RerankError;
use std::collections::HashSet;

/// Scores (query, document) pairs jointly.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Relevance of each document to `query`, one score per document, higher
    /// is better.
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError>;
}

/// Text handed to the reranker for one candidate: the abstract truncated to
/// `max_chars` characters, or the title when the abstract is blank.
pub fn rerank_text(result: &SearchResult, max_chars: usize) -> &str {
    let text = if result.document.abstract_text.trim().is_empty() {
        result.document.title.as_str()
    } else {
        result.document.abstract_text.as_str()
    };
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Rescores `candidates` and returns the best `top_m`, rerank score descending.
///
/// The sort is stable, so candidates with equal rerank scores keep their fused
/// order.
///
/// # Errors
///
/// Propagates the reranker's error, and rejects a score vector whose length
/// differs from the candidate count or that holds non-finite values.
pub fn rerank_candidates(
    reranker: &dyn Reranker,
    query: &str,
    mut candidates: Vec<SearchResult>,
    top_m: usize,
    max_chars: usize,
) -> Result<Vec<SearchResult>, RerankError> {
    if candidates.is_empty() || top_m == 0 {
        candidates.truncate(top_m);
        return Ok(candidates);
    }

    let texts: Vec<&str> = candidates
        .iter()
        .map(|c| rerank_text(c, max_chars))
        .collect();
    let scores = reranker.score(query, &texts)?;

    if scores.len() != candidates.len() {
        return Err(RerankError::ScoreCountMismatch {
            expected: candidates.len(),
            actual: scores.len(),
        });
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(RerankError::InferenceFailed(
            "Reranker produced a non-finite score".to_string(),
        ));
    }

    for (candidate, score) in candidates.iter_mut().zip(scores) {
        candidate.rerank_score = Some(score);
    }
    candidates.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_m);
    Ok(candidates)
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "to", "was", "were", "with",
];

/// Terms longer than this are compared on their prefix only, which folds
/// "diabetes"/"diabetic" and "elderly"/"elders" together without a stemmer.
const STEM_PREFIX_LEN: usize = 6;

/// Weight of query-term coverage; the rest goes to proximity.
const COVERAGE_WEIGHT: f32 = 0.8;

/// Pairwise scorer that needs no model: how many query terms a document
/// covers, and how close together the matched terms sit.
///
/// Scores fall in `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct TermOverlapReranker;

impl TermOverlapReranker {
    pub fn new() -> Self {
        Self
    }

    fn terms(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() >= 2)
            .map(|s| s.to_lowercase())
            .filter(|s| !STOP_WORDS.contains(&s.as_str()))
            .map(|s| s.chars().take(STEM_PREFIX_LEN).collect())
            .collect()
    }

    fn score_one(query_terms: &HashSet<String>, document: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let doc_terms = Self::terms(document);

        // Positions of each query term in the document
        let hits: Vec<(usize, &String)> = doc_terms
            .iter()
            .enumerate()
            .filter(|(_, t)| query_terms.contains(*t))
            .collect();
        let matched: HashSet<&String> = hits.iter().map(|(_, t)| *t).collect();
        if matched.is_empty() {
            return 0.0;
        }

        let coverage = matched.len() as f32 / query_terms.len() as f32;
        let proximity = match Self::min_window(&hits, matched.len()) {
            Some(window) => matched.len() as f32 / window as f32,
            None => 0.0,
        };

        COVERAGE_WEIGHT * coverage + (1.0 - COVERAGE_WEIGHT) * proximity
    }

    /// Length of the shortest span of `hits` containing all `distinct` terms.
    fn min_window(hits: &[(usize, &String)], distinct: usize) -> Option<usize> {
        let mut best: Option<usize> = None;
        for start in 0..hits.len() {
            let mut seen: HashSet<&String> = HashSet::new();
            for &(pos, term) in &hits[start..] {
                seen.insert(term);
                if seen.len() == distinct {
                    let span = pos - hits[start].0 + 1;
                    best = Some(best.map_or(span, |b| b.min(span)));
                    break;
                }
            }
        }
        best
    }
}

impl Reranker for TermOverlapReranker {
    fn name(&self) -> &str {
        "term-overlap"
    }

    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError> {
        let query_terms: HashSet<String> = Self::terms(query).into_iter().collect();
        Ok(documents
            .iter()
            .map(|doc| Self::score_one(&query_terms, doc))
            .collect())
    }
}

#[cfg(feature = "cross-encoder")]
pub use cross_encoder::CrossEncoderReranker;

#[cfg(feature = "cross-encoder")]
mod cross_encoder {
    use super::Reranker;
    use crate::error::RerankError;
    use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
    use std::sync::Mutex;
    use tracing::info;

    /// Cross-encoder reranker backed by fastembed's `TextRerank` (ONNX).
    pub struct CrossEncoderReranker {
        model: Mutex<TextRerank>,
        name: String,
    }

    impl CrossEncoderReranker {
        /// Loads `BGERerankerBase`, downloading it on first use.
        pub fn try_new() -> Result<Self, RerankError> {
            Self::with_model(RerankerModel::BGERerankerBase)
        }

        pub fn with_model(model: RerankerModel) -> Result<Self, RerankError> {
            let name = format!("{:?}", model);
            let model = TextRerank::try_new(RerankInitOptions::new(model))
                .map_err(|e| RerankError::ModelUnavailable(e.to_string()))?;
            info!(model = %name, "Loaded cross-encoder reranker");
            Ok(Self {
                model: Mutex::new(model),
                name,
            })
        }
    }

    impl Reranker for CrossEncoderReranker {
        fn name(&self) -> &str {
            &self.name
        }

        fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError> {
            let mut model = self
                .model
                .lock()
                .map_err(|e| RerankError::ModelUnavailable(format!("Lock poisoned: {}", e)))?;
            let results = model
                .rerank(query, documents.to_vec(), false, None)
                .map_err(|e| RerankError::InferenceFailed(e.to_string()))?;

            if results.len() != documents.len() {
                return Err(RerankError::ScoreCountMismatch {
                    expected: documents.len(),
                    actual: results.len(),
                });
            }

            // Results come back sorted by score; restore input order
            let mut scores = vec![0.0; documents.len()];
            for r in results {
                if let Some(slot) = scores.get_mut(r.index) {
                    *slot = r.score;
                }
            }
            Ok(scores)
        }
    }
}
