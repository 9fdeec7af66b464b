//! Capability shared by the retrieval channels.
//!
//! The document store fans writes out to two [`SearchIndex`] implementations
//! and the orchestrator queries them side by side. Keeping the seam a trait lets
//! either channel be swapped (or wrapped, e.g. to inject faults) without touching
//! the write protocol or the fusion path.

use super::types::{Channel, DocId, Document, RankedHit, SearchError};
use crate::embedding::EmbeddingFingerprint;

/// A document together with its embedding, as handed to each index.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry<'a> {
    pub document: &'a Document,
    pub embedding: &'a [f32],
}

/// One retrieval channel over the corpus.
///
/// Writes must be all-or-nothing per call: when `upsert` or `remove` returns an
/// error the index is left exactly as it was.
pub trait SearchIndex: Send + Sync {
    /// Which channel this index serves.
    fn channel(&self) -> Channel;

    /// Inserts or replaces the entry for `entry.document.id`.
    fn upsert(&mut self, entry: IndexEntry<'_>) -> Result<(), SearchError>;

    /// Removes an entry. Returns whether it existed.
    fn remove(&mut self, id: &DocId) -> Result<bool, SearchError>;

    /// Ranks indexed documents against `query_text`.
    ///
    /// Returns at most `top_k` hits with 1-based ranks, best first.
    fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<RankedHit>, SearchError>;

    fn contains(&self, id: &DocId) -> bool;

    /// All indexed ids, ascending.
    fn ids(&self) -> Vec<DocId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding model the index was built with, if it stores vectors.
    fn embedder_fingerprint(&self) -> Option<EmbeddingFingerprint> {
        None
    }

    /// Reclaims space left by replaced or removed entries. Returns the number
    /// of dead entries dropped.
    fn compact(&mut self) -> Result<usize, SearchError> {
        Ok(0)
    }

    /// Replaced or removed entries still occupying space.
    fn dead_entries(&self) -> usize {
        0
    }

    /// Fraction of the index occupied by dead entries.
    fn dead_ratio(&self) -> f32 {
        0.0
    }
}

/// An index that also keeps the full document record.
///
/// The lexical index stores records so results can be hydrated and a replaced
/// record restored if the second half of a write fails. Implementors index
/// the document alone and ignore [`IndexEntry::embedding`].
pub trait DocumentLookup {
    fn document(&self, id: &DocId) -> Option<Document>;
}

/// Assigns 1-based ranks to `(id, score)` pairs sorted best first.
pub(crate) fn rank_hits(channel: Channel, scored: Vec<(DocId, f32)>) -> Vec<RankedHit> {
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (id, score))| RankedHit {
            id,
            channel,
            rank: i + 1,
            score,
        })
        .collect()
}

/// Sorts by score descending, ties by id ascending.
pub(crate) fn sort_scored(scored: &mut [(DocId, f32)]) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_scored_breaks_ties_by_id() {
        let mut scored = vec![
            (DocId::from("b"), 1.0),
            (DocId::from("c"), 2.0),
            (DocId::from("a"), 1.0),
        ];
        sort_scored(&mut scored);
        let ids: Vec<&str> = scored.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_rank_hits_is_one_based() {
        let hits = rank_hits(
            Channel::Lexical,
            vec![(DocId::from("x"), 3.0), (DocId::from("y"), 1.0)],
        );
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].rank, 2);
        assert!(hits.iter().all(|h| h.channel == Channel::Lexical));
    }
}
