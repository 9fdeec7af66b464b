// rust-cv/hnsw semantic index with tombstone-based replacement

use super::channel::{rank_hits, sort_scored, IndexEntry, SearchIndex};
use super::types::{validate_dimension, Channel, DocId, IndexManifest, RankedHit, SearchError};
use crate::embedding::{Embedder, EmbeddingFingerprint};
use crate::storage::{InMemoryStore, IndexStore, StoreError};
use hnsw::{Hnsw, Searcher};
use instant::Instant;
use rand::rngs::StdRng;
use space::{Metric, Neighbor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Minimum ef_search parameter for HNSW queries.
///
/// ef_search controls recall vs speed tradeoff in HNSW search. We use
/// max(k * 2, MIN_EF_SEARCH) to scale with result count while keeping a floor.
const MIN_EF_SEARCH: usize = 50;

/// Metadata key of the persisted [`IndexManifest`].
const MANIFEST_KEY: &str = "manifest";

/// Cosine distance metric for embedding vectors
/// Computes 1 - cosine_similarity, scaled to u32
struct CosineDistance;

impl Metric<Box<[f32]>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let a_slice: &[f32] = a;
        let b_slice: &[f32] = b;

        let dot: f32 = a_slice
            .iter()
            .zip(b_slice.iter())
            .map(|(&x, &y)| x * y)
            .sum();
        let mag_a: f32 = a_slice.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b_slice.iter().map(|y| y * y).sum::<f32>().sqrt();

        if mag_a == 0.0 || mag_b == 0.0 {
            return u32::MAX; // Maximum distance for zero vectors
        }

        let cosine_sim = (dot / (mag_a * mag_b)).clamp(-1.0, 1.0);
        let distance = 1.0 - cosine_sim; // [0, 2]

        // Scale [0, 2] onto [0, u32::MAX]
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

fn distance_to_similarity(distance: u32) -> f32 {
    let distance_f32 = (distance as f32) / (u32::MAX as f32 / 2.0);
    (1.0 - distance_f32).clamp(0.0, 1.0)
}

/// Little-endian f32 values packed sequentially (4 bytes per value).
fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

type Graph = Hnsw<CosineDistance, Box<[f32]>, StdRng, 16, 32>;

/// Semantic index over abstract embeddings using HNSW.
///
/// Embeddings are stored in the index's [`IndexStore`] as raw little-endian
/// bytes keyed by document id, next to a manifest naming the embedder that
/// produced them. The graph is rebuilt from a full scan on open.
///
/// # HNSW Parameters
///
/// - **M = 16**: bidirectional links per node at layers > 0
/// - **M0 = 32**: links at layer 0 (2*M for denser connectivity at the base)
///
/// # Replacement
///
/// HNSW has no true deletion. Replacing or removing a document tombstones its
/// node; tombstoned nodes are filtered from results and reclaimed by
/// [`SemanticIndex::compact`].
pub struct SemanticIndex {
    index: Graph,
    /// HNSW position -> document id
    positions: Vec<DocId>,
    /// Document id -> live HNSW position
    live: HashMap<DocId, usize>,
    /// Soft-deleted HNSW positions
    tombstones: HashSet<usize>,
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    /// Hits at or below this similarity are dropped
    min_similarity: f32,
    store: Arc<dyn IndexStore>,
}

impl SemanticIndex {
    /// Opens the index over `store`, rebuilding the graph from persisted embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::EmbeddingMismatch`] if the store was built with a
    /// different embedder than `embedder`.
    pub fn open(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        min_similarity: f32,
    ) -> Result<Self, SearchError> {
        let start = Instant::now();
        let fingerprint = embedder.fingerprint();

        match store.get_meta(MANIFEST_KEY)? {
            Some(bytes) => {
                let manifest: IndexManifest = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::SerializationError(format!("Corrupt semantic manifest: {}", e))
                })?;
                if !manifest.is_compatible(&fingerprint) {
                    return Err(SearchError::EmbeddingMismatch {
                        expected: manifest.embedder.to_string(),
                        actual: fingerprint.to_string(),
                    });
                }
            }
            None => {
                let manifest = IndexManifest::new(fingerprint.clone());
                let bytes = serde_json::to_vec(&manifest).map_err(|e| {
                    StoreError::SerializationError(format!("Manifest: {}", e))
                })?;
                store.put_meta(MANIFEST_KEY, &bytes)?;
            }
        }

        let mut this = Self {
            index: Hnsw::new(CosineDistance),
            positions: Vec::new(),
            live: HashMap::new(),
            tombstones: HashSet::new(),
            dimension: fingerprint.dimension,
            embedder,
            min_similarity,
            store,
        };

        let persisted = this.store.scan()?;
        let mut searcher = Searcher::default();
        for (key, bytes) in persisted {
            let embedding = deserialize_embedding(&bytes);
            validate_dimension(this.dimension, embedding.len())?;
            this.insert_node(DocId::from(key), embedding, &mut searcher);
        }

        debug!(
            entries = this.live.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Opened semantic index"
        );
        Ok(this)
    }

    /// Creates an empty index backed by an [`InMemoryStore`].
    pub fn in_memory(embedder: Arc<dyn Embedder>, min_similarity: f32) -> Self {
        let dimension = embedder.embedding_dim();
        Self {
            index: Hnsw::new(CosineDistance),
            positions: Vec::new(),
            live: HashMap::new(),
            tombstones: HashSet::new(),
            embedder,
            dimension,
            min_similarity,
            store: Arc::new(InMemoryStore::new()),
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Total graph nodes, live and tombstoned.
    pub fn graph_len(&self) -> usize {
        self.positions.len()
    }

    /// Stored embedding of a live document.
    pub fn embedding(&self, id: &DocId) -> Result<Option<Vec<f32>>, SearchError> {
        if !self.live.contains_key(id) {
            return Ok(None);
        }
        Ok(self
            .store
            .get(id.as_str())?
            .map(|bytes| deserialize_embedding(&bytes)))
    }

    fn insert_node(&mut self, id: DocId, embedding: Vec<f32>, searcher: &mut Searcher<u32>) {
        if let Some(old) = self.live.remove(&id) {
            self.tombstones.insert(old);
        }
        let position = self.index.insert(embedding.into_boxed_slice(), searcher);
        debug_assert_eq!(position, self.positions.len());
        self.positions.push(id.clone());
        self.live.insert(id, position);
    }

    /// Ranks live documents against a precomputed query vector.
    pub fn search_embedding(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RankedHit>, SearchError> {
        validate_dimension(self.dimension, query_embedding.len())?;

        if top_k == 0 || self.live.is_empty() {
            return Ok(Vec::new());
        }

        // Tombstoned nodes still occupy result slots, so over-fetch by their count
        let wanted = std::cmp::min(
            top_k.saturating_add(self.tombstones.len()),
            self.positions.len(),
        );
        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0
            };
            wanted
        ];
        let ef_search = std::cmp::max(wanted * 2, MIN_EF_SEARCH);

        let query_box = query_embedding.to_vec().into_boxed_slice();
        let mut searcher = Searcher::default();
        self.index
            .nearest(&query_box, ef_search, &mut searcher, &mut neighbors);

        let mut scored: Vec<(DocId, f32)> = neighbors
            .into_iter()
            .filter(|n| n.index != !0)
            .filter(|n| !self.tombstones.contains(&n.index))
            .map(|n| (self.positions[n.index].clone(), distance_to_similarity(n.distance)))
            .filter(|(_, similarity)| *similarity > self.min_similarity)
            .collect();

        sort_scored(&mut scored);
        scored.truncate(top_k);
        Ok(rank_hits(Channel::Semantic, scored))
    }
}

impl SearchIndex for SemanticIndex {
    fn channel(&self) -> Channel {
        Channel::Semantic
    }

    #[instrument(skip_all, fields(id = %entry.document.id, index_size = self.positions.len()))]
    fn upsert(&mut self, entry: IndexEntry<'_>) -> Result<(), SearchError> {
        validate_dimension(self.dimension, entry.embedding.len())?;

        // Persist first: if this fails the graph is untouched
        self.store
            .put(entry.document.id.as_str(), &serialize_embedding(entry.embedding))?;

        let mut searcher = Searcher::default();
        self.insert_node(
            entry.document.id.clone(),
            entry.embedding.to_vec(),
            &mut searcher,
        );
        Ok(())
    }

    fn remove(&mut self, id: &DocId) -> Result<bool, SearchError> {
        if !self.live.contains_key(id) {
            return Ok(false);
        }
        self.store.delete(id.as_str())?;
        if let Some(position) = self.live.remove(id) {
            self.tombstones.insert(position);
        }
        Ok(true)
    }

    fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<RankedHit>, SearchError> {
        if query_text.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let query_embedding = self
            .embedder
            .embed(query_text)
            .map_err(|e| SearchError::IndexError(format!("Query embedding failed: {}", e)))?;

        let hits = self.search_embedding(&query_embedding, top_k)?;
        debug!(query_len = query_text.len(), hits = hits.len(), "Semantic search");
        Ok(hits)
    }

    fn contains(&self, id: &DocId) -> bool {
        self.live.contains_key(id)
    }

    fn ids(&self) -> Vec<DocId> {
        let mut ids: Vec<DocId> = self.live.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn len(&self) -> usize {
        self.live.len()
    }

    fn embedder_fingerprint(&self) -> Option<EmbeddingFingerprint> {
        Some(self.embedder.fingerprint())
    }

    /// Rebuilds the HNSW graph from the live entries' stored embeddings.
    #[instrument(skip(self), fields(before_size = self.positions.len()))]
    fn compact(&mut self) -> Result<usize, SearchError> {
        let removed = self.tombstones.len();
        if removed == 0 {
            info!("Compaction skipped: no tombstones");
            return Ok(0);
        }

        let mut live: Vec<(DocId, usize)> =
            self.live.iter().map(|(id, pos)| (id.clone(), *pos)).collect();
        live.sort_by_key(|(_, pos)| *pos);

        let mut entries = Vec::with_capacity(live.len());
        for (id, _) in live {
            match self.store.get(id.as_str())? {
                Some(bytes) => entries.push((id, deserialize_embedding(&bytes))),
                None => warn!(id = %id, "Embedding missing during compaction, dropping entry"),
            }
        }

        let mut index: Graph = Hnsw::new(CosineDistance);
        let mut positions = Vec::with_capacity(entries.len());
        let mut live = HashMap::with_capacity(entries.len());
        let mut searcher = Searcher::default();
        for (id, embedding) in entries {
            let position = index.insert(embedding.into_boxed_slice(), &mut searcher);
            positions.push(id.clone());
            live.insert(id, position);
        }

        let before = self.positions.len();
        self.index = index;
        self.positions = positions;
        self.live = live;
        self.tombstones.clear();

        info!(
            "Compaction complete: {} -> {} graph nodes",
            before,
            self.positions.len()
        );
        Ok(removed)
    }

    fn dead_entries(&self) -> usize {
        self.tombstones.len()
    }

    fn dead_ratio(&self) -> f32 {
        if self.positions.is_empty() {
            0.0
        } else {
            self.tombstones.len() as f32 / self.positions.len() as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::error::EmbeddingError;
    use crate::search::types::Document;

    /// Maps known words onto fixed axes so tests control geometry exactly.
    struct AxisEmbedder;

    impl Embedder for AxisEmbedder {
        fn model_id(&self) -> &str {
            "axis"
        }

        fn embedding_dim(&self) -> usize {
            3
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0; 3];
            for word in text.split_whitespace() {
                match word {
                    "x" => v[0] += 1.0,
                    "y" => v[1] += 1.0,
                    "z" => v[2] += 1.0,
                    _ => {}
                }
            }
            Ok(v)
        }
    }

    fn axis_index() -> SemanticIndex {
        SemanticIndex::in_memory(Arc::new(AxisEmbedder), 0.0)
    }

    fn add(index: &mut SemanticIndex, id: &str, embedding: Vec<f32>) {
        let doc = Document::new(id, "t", "b");
        index
            .upsert(IndexEntry {
                document: &doc,
                embedding: &embedding,
            })
            .unwrap();
    }

    #[test]
    fn test_semantic_search() {
        let mut index = axis_index();
        add(&mut index, "x", vec![1.0, 0.0, 0.0]);
        add(&mut index, "y", vec![0.0, 1.0, 0.0]);
        add(&mut index, "xy", vec![1.0, 0.1, 0.0]);

        let hits = index.search("x", 2).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.as_str(), "x");
        assert_eq!(hits[1].id.as_str(), "xy");
        assert_eq!(hits[0].channel, Channel::Semantic);
    }

    #[test]
    fn test_orthogonal_hits_are_dropped() {
        let mut index = axis_index();
        add(&mut index, "x", vec![1.0, 0.0, 0.0]);
        add(&mut index, "z", vec![0.0, 0.0, 1.0]);

        let hits = index.search("x", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "x");
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let index = axis_index();
        assert!(matches!(index.search(" ", 5), Err(SearchError::EmptyQuery)));
    }

    #[test]
    fn test_search_empty_index() {
        let index = axis_index();
        assert!(index.search("x", 10).unwrap().is_empty());
    }

    #[test]
    fn test_exact_match_returns_high_similarity() {
        let mut index = axis_index();
        add(&mut index, "a", vec![0.5, 0.3, 0.2]);

        let hits = index.search_embedding(&[0.5, 0.3, 0.2], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.95, "got {}", hits[0].score);
    }

    #[test]
    fn test_results_sorted_by_similarity() {
        let mut index = axis_index();
        for i in 0..100 {
            let angle = (i as f32) * 0.01;
            add(&mut index, &format!("doc-{i:03}"), vec![angle.cos(), angle.sin(), 0.0]);
        }

        let hits = index.search_embedding(&[0.5, 0.5, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 10);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            assert_eq!(pair[1].rank, pair[0].rank + 1);
        }
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
    }

    #[test]
    fn test_upsert_dimension_mismatch() {
        let mut index = axis_index();
        let doc = Document::new("a", "t", "b");
        let result = index.upsert(IndexEntry {
            document: &doc,
            embedding: &[1.0, 0.0],
        });
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(index.is_empty());
        assert!(index.store().is_empty().unwrap());
    }

    #[test]
    fn test_replace_tombstones_old_node() {
        let mut index = axis_index();
        add(&mut index, "a", vec![1.0, 0.0, 0.0]);
        add(&mut index, "a", vec![0.0, 1.0, 0.0]);

        assert_eq!(index.len(), 1);
        assert_eq!(index.graph_len(), 2);
        assert_eq!(index.dead_entries(), 1);

        // Only the new vector is searchable
        assert!(index.search("x", 5).unwrap().is_empty());
        let hits = index.search("y", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "a");
    }

    #[test]
    fn test_unbounded_top_k_with_tombstones() {
        let mut index = axis_index();
        add(&mut index, "a", vec![1.0, 0.0, 0.0]);
        add(&mut index, "a", vec![0.9, 0.1, 0.0]);
        add(&mut index, "b", vec![0.8, 0.2, 0.0]);

        let hits = index.search("x", usize::MAX).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.as_str(), "a");
        assert_eq!(hits[1].id.as_str(), "b");
    }

    #[test]
    fn test_remove_filters_results() {
        let mut index = axis_index();
        add(&mut index, "a", vec![1.0, 0.0, 0.0]);
        add(&mut index, "b", vec![0.9, 0.1, 0.0]);

        assert!(index.remove(&DocId::from("a")).unwrap());
        assert!(!index.remove(&DocId::from("a")).unwrap());

        let hits = index.search("x", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "b");
        assert!(index.store().get("a").unwrap().is_none());
    }

    #[test]
    fn test_compact_reclaims_tombstones() {
        let mut index = axis_index();
        add(&mut index, "a", vec![1.0, 0.0, 0.0]);
        add(&mut index, "b", vec![0.0, 1.0, 0.0]);
        add(&mut index, "a", vec![0.7, 0.7, 0.0]);
        index.remove(&DocId::from("b")).unwrap();

        assert!(index.dead_ratio() > 0.5);
        assert_eq!(index.compact().unwrap(), 2);

        assert_eq!(index.graph_len(), 1);
        assert_eq!(index.dead_entries(), 0);
        assert_eq!(index.dead_ratio(), 0.0);
        assert_eq!(index.search("x", 5).unwrap()[0].id.as_str(), "a");
        assert_eq!(index.compact().unwrap(), 0);
    }

    #[test]
    fn test_reopen_from_store() {
        let store: Arc<dyn IndexStore> = Arc::new(InMemoryStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(AxisEmbedder);
        {
            let mut index = SemanticIndex::open(store.clone(), embedder.clone(), 0.0).unwrap();
            add(&mut index, "a", vec![1.0, 0.0, 0.0]);
            add(&mut index, "b", vec![0.0, 1.0, 0.0]);
            add(&mut index, "a", vec![0.0, 0.0, 1.0]);
        }

        let index = SemanticIndex::open(store, embedder, 0.0).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dead_entries(), 0);
        assert_eq!(index.search("z", 5).unwrap()[0].id.as_str(), "a");
        assert_eq!(
            index.embedding(&DocId::from("a")).unwrap(),
            Some(vec![0.0, 0.0, 1.0])
        );
    }

    #[test]
    fn test_reopen_with_different_embedder_fails() {
        let store: Arc<dyn IndexStore> = Arc::new(InMemoryStore::new());
        SemanticIndex::open(store.clone(), Arc::new(AxisEmbedder), 0.0).unwrap();

        let result = SemanticIndex::open(store, Arc::new(HashingEmbedder::new(3)), 0.0);
        assert!(matches!(result, Err(SearchError::EmbeddingMismatch { .. })));
    }

    #[test]
    fn test_embedding_round_trip_bytes() {
        let embedding = vec![1.5, -2.25, 0.0, f32::MIN_POSITIVE];
        assert_eq!(deserialize_embedding(&serialize_embedding(&embedding)), embedding);
    }

    #[test]
    fn test_zero_query_vector_returns_nothing() {
        let mut index = axis_index();
        add(&mut index, "a", vec![1.0, 0.0, 0.0]);

        // No known words -> zero vector -> maximal distance
        assert!(index.search("unrelated words", 5).unwrap().is_empty());
    }
}
