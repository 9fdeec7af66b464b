//! Reciprocal Rank Fusion: score = Σ 1/(k + rank_i)
//!
//! Merges the per-channel ranked lists into one consensus ranking. Only ranks
//! are used, so BM25 magnitudes and cosine similarities never need to be put
//! on a common scale.

use super::types::{Channel, DocId, FusedHit, RankedHit};
use crate::config::DEFAULT_RRF_K;
use std::collections::HashMap;

/// Default RRF smoothing constant, see [`DEFAULT_RRF_K`].
pub const RRF_K: u32 = DEFAULT_RRF_K;

struct Accumulator {
    score: f64,
    channels: Vec<Channel>,
    best_rank: usize,
}

/// Fuses ranked lists, one per channel.
///
/// Every id appearing in any list appears exactly once in the output. If a
/// list repeats an id, only its best rank in that list counts. Output order is
/// fused score descending, then best individual rank ascending, then id
/// ascending.
pub fn reciprocal_rank_fusion(lists: &[Vec<RankedHit>], k: u32) -> Vec<FusedHit> {
    let mut acc: HashMap<&DocId, Accumulator> = HashMap::new();

    for list in lists {
        // Best rank per id within this list
        let mut per_list: HashMap<&DocId, (usize, Channel)> = HashMap::new();
        for hit in list {
            per_list
                .entry(&hit.id)
                .and_modify(|(rank, _)| *rank = (*rank).min(hit.rank))
                .or_insert((hit.rank, hit.channel));
        }

        for (id, (rank, channel)) in per_list {
            let contribution = 1.0 / (k as f64 + rank as f64);
            let entry = acc.entry(id).or_insert(Accumulator {
                score: 0.0,
                channels: Vec::new(),
                best_rank: usize::MAX,
            });
            entry.score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
            if !entry.channels.contains(&channel) {
                entry.channels.push(channel);
            }
        }
    }

    let mut fused: Vec<(&DocId, Accumulator)> = acc.into_iter().collect();
    fused.sort_by(|(id_a, a), (id_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| id_a.cmp(id_b))
    });

    fused
        .into_iter()
        .map(|(id, mut a)| {
            a.channels.sort();
            FusedHit {
                id: id.clone(),
                fused_score: a.score as f32,
                channels: a.channels,
                best_rank: a.best_rank,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(channel: Channel, ids: &[&str]) -> Vec<RankedHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedHit {
                id: DocId::from(*id),
                channel,
                rank: i + 1,
                score: 1.0 / (i + 1) as f32,
            })
            .collect()
    }

    fn ids(fused: &[FusedHit]) -> Vec<&str> {
        fused.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn test_rrf_basic() {
        let lexical = list(Channel::Lexical, &["a", "b", "c"]);
        let semantic = list(Channel::Semantic, &["b", "a", "d"]);

        let fused = reciprocal_rank_fusion(&[lexical, semantic], RRF_K);

        assert_eq!(fused.len(), 4);
        // a and b both score 1/61 + 1/62; a wins on id
        assert_eq!(ids(&fused), vec!["a", "b", "c", "d"]);
        let expected = (1.0 / 61.0 + 1.0 / 62.0) as f32;
        assert!((fused[0].fused_score - expected).abs() < 1e-7);
        assert_eq!(fused[0].channels, vec![Channel::Lexical, Channel::Semantic]);
    }

    #[test]
    fn test_rrf_empty_inputs() {
        assert!(reciprocal_rank_fusion(&[], RRF_K).is_empty());
        assert!(reciprocal_rank_fusion(&[Vec::new(), Vec::new()], RRF_K).is_empty());
    }

    #[test]
    fn test_rrf_single_ranker() {
        let lexical = list(Channel::Lexical, &["x", "y", "z"]);
        let fused = reciprocal_rank_fusion(&[lexical, Vec::new()], RRF_K);

        assert_eq!(ids(&fused), vec!["x", "y", "z"]);
        assert!(fused.iter().all(|h| h.channels == vec![Channel::Lexical]));
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-7);
    }

    #[test]
    fn test_rrf_is_symmetric_in_channel_order() {
        let lexical = list(Channel::Lexical, &["a", "b", "c"]);
        let semantic = list(Channel::Semantic, &["c", "d", "a"]);

        let forward = reciprocal_rank_fusion(&[lexical.clone(), semantic.clone()], RRF_K);
        let backward = reciprocal_rank_fusion(&[semantic, lexical], RRF_K);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_top_in_both_channels_fuses_first() {
        let lexical = list(Channel::Lexical, &["top", "l2", "l3", "l4"]);
        let semantic = list(Channel::Semantic, &["top", "s2", "l2", "s4"]);

        let fused = reciprocal_rank_fusion(&[lexical, semantic], RRF_K);
        assert_eq!(fused[0].id.as_str(), "top");
        assert!((fused[0].fused_score - 2.0 / 61.0).abs() < 1e-7);
        assert_eq!(fused[0].best_rank, 1);
    }

    #[test]
    fn test_union_without_duplicates() {
        let lexical = list(Channel::Lexical, &["a", "b", "c"]);
        let semantic = list(Channel::Semantic, &["c", "d", "e", "a"]);

        let fused = reciprocal_rank_fusion(&[lexical, semantic], RRF_K);
        let mut seen = ids(&fused);
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let lexical = list(Channel::Lexical, &["m"]);
        let semantic = list(Channel::Semantic, &["b"]);
        let fused = reciprocal_rank_fusion(&[lexical, semantic], RRF_K);
        assert_eq!(ids(&fused), vec!["b", "m"]);
    }

    #[test]
    fn test_ties_prefer_best_individual_rank() {
        // With k = 0, rank 1 alone (1/1) ties rank 2 in both lists (1/2 + 1/2)
        let lexical = list(Channel::Lexical, &["solo", "pair"]);
        let semantic = list(Channel::Semantic, &["other", "pair"]);
        let fused = reciprocal_rank_fusion(&[lexical, semantic], 0);

        let solo = fused.iter().position(|h| h.id.as_str() == "solo").unwrap();
        let pair = fused.iter().position(|h| h.id.as_str() == "pair").unwrap();
        assert_eq!(fused[solo].fused_score, fused[pair].fused_score);
        assert_eq!(fused[pair].best_rank, 2);
        assert!(solo < pair);
    }

    #[test]
    fn test_duplicate_id_within_list_counts_once() {
        let mut lexical = list(Channel::Lexical, &["a", "b"]);
        lexical.push(RankedHit {
            id: DocId::from("a"),
            channel: Channel::Lexical,
            rank: 3,
            score: 0.1,
        });

        let fused = reciprocal_rank_fusion(&[lexical], RRF_K);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-7);
    }
}
