//! Hybrid search engine combining lexical (BM25) and semantic (HNSW) search.
//!
//! This module provides the [`HybridSearchEngine`] which orchestrates:
//! - BM25 keyword search over titles and abstracts
//! - HNSW vector search over abstract embeddings
//! - Reciprocal Rank Fusion (RRF) for combining the two rankings
//! - Pairwise reranking of the fused top candidates
//!
//! # Concurrency
//!
//! The [`DocumentStore`] sits behind a `tokio::sync::RwLock`. A search takes one
//! read guard and shares it between both channel tasks, so both rank the same
//! snapshot and never see a write halfway applied. Writes take the write
//! guard for the full dual-index write.
//!
//! A channel task that outlives its timeout still holds its share of the read
//! guard. Tokio's lock is fair, so a writer queued behind that task would hold
//! back every later reader too. Writers therefore poll for the lock instead of
//! queueing, and every lock wait is bounded: searches by `channel_timeout`,
//! writes by `write_timeout`.
//!
//! # Degradation
//!
//! Each channel and the reranker run on blocking tasks with a bounded wait.
//! A channel that errors, panics or times out is dropped from fusion and the
//! search continues on the other one; only when both are gone does the search
//! fail. A reranker failure falls back to the fused order.


use super::channel::{DocumentLookup, SearchIndex};
use super::document_store::DocumentStore;
use super::fusion::reciprocal_rank_fusion;
use super::keyword::LexicalIndex;
use super::rerank::{rerank_candidates, Reranker, TermOverlapReranker};
use super::types::{
    Channel, CompactionStats, ConsistencyReport, DocId, Document, FusedHit, IndexStats,
    IndexingStage, RankedHit, SearchError, SearchResult,
};
use super::vector::SemanticIndex;
use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::metrics::{global_metrics, PerformanceMetrics, SearchSample};
use crate::storage::IndexStore;
use instant::Instant;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, instrument, warn};

type Snapshot<L, V> = Arc<OwnedRwLockReadGuard<DocumentStore<L, V>>>;
type WriteGuard<L, V> = OwnedRwLockWriteGuard<DocumentStore<L, V>>;

/// Longest pause between two attempts to take the write lock.
const WRITE_POLL_MAX: Duration = Duration::from_millis(25);

/// Ranked lists of one query, fused.
struct Retrieval {
    fused: Vec<FusedHit>,
    lexical_scores: HashMap<DocId, f32>,
    semantic_scores: HashMap<DocId, f32>,
    lexical_ms: Option<f64>,
    semantic_ms: Option<f64>,
    fusion_ms: f64,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Hybrid search engine over a dual-index [`DocumentStore`].
///
/// # Example
///
/// ```
/// use briefsearch_core::config::SearchConfig;
/// use briefsearch_core::embedding::HashingEmbedder;
/// use briefsearch_core::search::{Document, HybridSearchEngine};
/// use std::sync::Arc;
///
/// # let rt = tokio::runtime::Runtime::new().unwrap();
/// # rt.block_on(async {
/// let engine = HybridSearchEngine::new(SearchConfig::default(), Arc::new(HashingEmbedder::default()))?;
/// engine
///     .add_document(Document::new("pmid-1", "Statins", "statin therapy in older adults"))
///     .await?;
///
/// let results = engine.search("statin therapy", 5).await?;
/// assert_eq!(results[0].id().as_str(), "pmid-1");
/// # Ok::<(), briefsearch_core::search::SearchError>(())
/// # }).unwrap();
/// ```
pub struct HybridSearchEngine<L = LexicalIndex, V = SemanticIndex> {
    config: SearchConfig,
    store: Arc<RwLock<DocumentStore<L, V>>>,
    reranker: Option<Arc<dyn Reranker>>,
    metrics: PerformanceMetrics,
}

impl HybridSearchEngine<LexicalIndex, SemanticIndex> {
    /// Empty engine over in-memory indexes.
    pub fn new(config: SearchConfig, embedder: Arc<dyn Embedder>) -> Result<Self, SearchError> {
        config.validate()?;
        let store = DocumentStore::in_memory(embedder, config.min_semantic_similarity);
        Ok(Self::from_store(config, store))
    }

    /// Engine over persistent index stores, loading whatever they hold.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::EmbeddingMismatch`] if the semantic store was
    /// written with a different embedder.
    pub fn open(
        config: SearchConfig,
        embedder: Arc<dyn Embedder>,
        lexical_store: Arc<dyn IndexStore>,
        semantic_store: Arc<dyn IndexStore>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let start = Instant::now();
        let lexical = LexicalIndex::open(lexical_store)?;
        let semantic =
            SemanticIndex::open(semantic_store, embedder.clone(), config.min_semantic_similarity)?;
        let store = DocumentStore::new(lexical, semantic, embedder)?;

        info!(
            documents = store.count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded search indexes"
        );
        Ok(Self::from_store(config, store))
    }

    /// Engine over `lexical.redb` and `semantic.redb` in `data_dir`.
    #[cfg(feature = "redb-store")]
    pub fn open_dir(
        config: SearchConfig,
        embedder: Arc<dyn Embedder>,
        data_dir: &std::path::Path,
    ) -> Result<Self, SearchError> {
        use crate::storage::{RedbStore, LEXICAL_DB_FILENAME, SEMANTIC_DB_FILENAME};

        let lexical = RedbStore::open(data_dir.join(LEXICAL_DB_FILENAME))?;
        let semantic = RedbStore::open(data_dir.join(SEMANTIC_DB_FILENAME))?;
        Self::open(config, embedder, Arc::new(lexical), Arc::new(semantic))
    }
}

impl<L, V> HybridSearchEngine<L, V>
where
    L: SearchIndex + DocumentLookup + 'static,
    V: SearchIndex + 'static,
{
    /// Engine over caller-built indexes.
    pub fn with_indexes(
        config: SearchConfig,
        embedder: Arc<dyn Embedder>,
        lexical: L,
        semantic: V,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let store = DocumentStore::new(lexical, semantic, embedder)?;
        Ok(Self::from_store(config, store))
    }

    fn from_store(config: SearchConfig, store: DocumentStore<L, V>) -> Self {
        Self {
            config,
            store: Arc::new(RwLock::new(store)),
            reranker: Some(Arc::new(TermOverlapReranker::new())),
            metrics: global_metrics().clone(),
        }
    }

    /// Replaces the default [`TermOverlapReranker`].
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Returns fused order without reranking.
    pub fn without_reranker(mut self) -> Self {
        self.reranker = None;
        self
    }

    /// Records into `metrics` instead of the global collector.
    pub fn with_metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Indexes `doc` in both channels, replacing any document with the same id.
    ///
    /// Visible to every search that starts after this returns.
    pub async fn add_document(&self, doc: Document) -> Result<(), SearchError> {
        let mut results = self.add_documents(vec![doc]).await;
        results.pop().unwrap_or(Ok(()))
    }

    /// Indexes several documents under one write lock.
    ///
    /// Each document succeeds or fails on its own; the result vector is
    /// parallel to `docs`.
    #[instrument(skip_all, fields(count = docs.len()))]
    pub async fn add_documents(&self, docs: Vec<Document>) -> Vec<Result<(), SearchError>> {
        let count = docs.len();
        let mut guard = match self.acquire_write().await {
            Ok(guard) => guard,
            Err(reason) => {
                warn!("{}, {} documents not indexed", reason, count);
                return docs
                    .into_iter()
                    .map(|doc| {
                        Err(SearchError::IndexingFailure {
                            id: doc.id,
                            stage: IndexingStage::Lexical,
                            rolled_back: true,
                            reason: reason.clone(),
                        })
                    })
                    .collect();
            }
        };
        let metrics = self.metrics.clone();

        let task = tokio::task::spawn_blocking(move || {
            docs.into_iter()
                .map(|doc| {
                    let start = Instant::now();
                    let result = guard.add_document(doc);
                    match &result {
                        Ok(()) => metrics.record_indexing(elapsed_ms(start)),
                        Err(SearchError::IndexingFailure { rolled_back, .. }) => {
                            metrics.record_write_failure(*rolled_back)
                        }
                        Err(_) => {}
                    }
                    result
                })
                .collect::<Vec<_>>()
        });

        match task.await {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    warn!("{} of {} documents failed to index", failed, count);
                }
                results
            }
            Err(e) => {
                let reason = format!("Indexing task failed: {}", e);
                (0..count)
                    .map(|_| Err(SearchError::IndexError(reason.clone())))
                    .collect()
            }
        }
    }

    /// Removes a document from both indexes. Returns whether it existed.
    pub async fn remove_document(&self, id: &DocId) -> Result<bool, SearchError> {
        let mut guard = self.acquire_write().await.map_err(|reason| {
            SearchError::IndexingFailure {
                id: id.clone(),
                stage: IndexingStage::Lexical,
                rolled_back: true,
                reason,
            }
        })?;
        let id = id.clone();
        let metrics = self.metrics.clone();

        tokio::task::spawn_blocking(move || {
            let result = guard.remove_document(&id);
            if let Err(SearchError::IndexingFailure { rolled_back, .. }) = &result {
                metrics.record_write_failure(*rolled_back);
            }
            result
        })
        .await
        .map_err(|e| SearchError::IndexError(format!("Remove task failed: {}", e)))?
    }

    pub async fn get_document(&self, id: &DocId) -> Option<Document> {
        self.store.read().await.get(id)
    }

    /// Number of distinct indexed documents.
    pub async fn count(&self) -> usize {
        self.store.read().await.count()
    }

    /// Searches both channels, fuses, and reranks.
    ///
    /// Each channel is asked for `top_k * candidate_multiplier` hits; that many
    /// fused candidates go to the reranker, which keeps `top_k`.
    ///
    /// # Errors
    ///
    /// - [`SearchError::EmptyQuery`] if `query_text` is empty or whitespace
    /// - [`SearchError::InvalidQuery`] if `top_k` is 0
    /// - [`SearchError::SearchUnavailable`] if neither channel answered, or a
    ///   write held the indexes for longer than `channel_timeout`
    #[must_use = "Search results should be used or errors handled"]
    #[instrument(skip(self), fields(query_len = query_text.len()))]
    pub async fn search(
        &self,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        validate_query(query_text, top_k)?;
        let start = Instant::now();
        let depth = self.config.candidate_depth(top_k);

        let snapshot = self.acquire_snapshot().await?;
        let retrieval = self.retrieve(&snapshot, query_text, depth).await?;
        let candidates = hydrate(&**snapshot, &retrieval, depth);
        drop(snapshot);

        let (results, rerank_ms) = self.rerank_or_fallback(query_text, candidates, top_k).await;

        self.metrics.record_search(&SearchSample {
            lexical_ms: retrieval.lexical_ms,
            semantic_ms: retrieval.semantic_ms,
            fusion_ms: retrieval.fusion_ms,
            rerank_ms,
            total_ms: elapsed_ms(start),
            result_count: results.len(),
            lexical_count: retrieval.lexical_scores.len(),
            semantic_count: retrieval.semantic_scores.len(),
            top_score: results.first().map(SearchResult::score),
        });
        debug!(results = results.len(), "Search complete");
        Ok(results)
    }

    /// Retrieves for each expanded query and reranks the merged candidates
    /// once against `topic`.
    ///
    /// Blank queries are skipped. A document found by several queries keeps
    /// the entry from the first query that found it. Merged candidates are
    /// ordered by fused score, then id, before reranking. A blank `topic` reranks
    /// against the queries joined by spaces.
    ///
    /// # Errors
    ///
    /// - [`SearchError::EmptyQuery`] if every query is blank
    /// - [`SearchError::InvalidQuery`] if `top_k` is 0
    /// - [`SearchError::SearchUnavailable`] if no query could be answered
    #[instrument(skip(self, queries), fields(queries = queries.len()))]
    pub async fn search_expanded<S: AsRef<str>>(
        &self,
        topic: &str,
        queries: &[S],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let queries: Vec<&str> = queries
            .iter()
            .map(|q| q.as_ref().trim())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        validate_query(queries[0], top_k)?;

        let start = Instant::now();
        let depth = self.config.candidate_depth(top_k);
        let snapshot = self.acquire_snapshot().await?;

        let mut seen: HashSet<DocId> = HashSet::new();
        let mut merged: Vec<SearchResult> = Vec::new();
        let mut sample = SearchSample::default();
        let mut answered = 0;
        let mut last_error = None;

        for query in &queries {
            let retrieval = match self.retrieve(&snapshot, query, depth).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Expanded query skipped: {}", e);
                    last_error = Some(e);
                    continue;
                }
            };

            answered += 1;
            sample.lexical_ms = sum_opt(sample.lexical_ms, retrieval.lexical_ms);
            sample.semantic_ms = sum_opt(sample.semantic_ms, retrieval.semantic_ms);
            sample.fusion_ms += retrieval.fusion_ms;
            sample.lexical_count += retrieval.lexical_scores.len();
            sample.semantic_count += retrieval.semantic_scores.len();

            for result in hydrate(&**snapshot, &retrieval, depth) {
                if seen.insert(result.document.id.clone()) {
                    merged.push(result);
                }
            }
        }
        drop(snapshot);

        if answered == 0 {
            return Err(last_error.unwrap_or_else(|| {
                SearchError::SearchUnavailable("No expanded query could be answered".to_string())
            }));
        }

        merged.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id().cmp(b.id()))
        });
        merged.truncate(depth);

        let rerank_query = if topic.trim().is_empty() {
            queries.join(" ")
        } else {
            topic.to_string()
        };
        let (results, rerank_ms) = self.rerank_or_fallback(&rerank_query, merged, top_k).await;

        sample.rerank_ms = rerank_ms;
        sample.total_ms = elapsed_ms(start);
        sample.result_count = results.len();
        sample.top_score = results.first().map(SearchResult::score);
        self.metrics.record_search(&sample);

        info!(
            queries = queries.len(),
            results = results.len(),
            "Expanded search complete"
        );
        Ok(results)
    }

    /// Compares the id sets of both indexes.
    pub async fn check_consistency(&self) -> ConsistencyReport {
        self.store.read().await.check_consistency()
    }

    /// Reconciles the indexes; see [`DocumentStore::repair`].
    ///
    /// If the write lock cannot be taken in time nothing is repaired and the
    /// current report is returned.
    pub async fn repair(&self) -> ConsistencyReport {
        let mut guard = match self.acquire_write().await {
            Ok(guard) => guard,
            Err(reason) => {
                warn!("Repair skipped: {}", reason);
                return self.check_consistency().await;
            }
        };
        match tokio::task::spawn_blocking(move || guard.repair()).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Repair task failed: {}", e);
                self.store.read().await.check_consistency()
            }
        }
    }

    /// Compacts indexes whose dead-entry ratio exceeds the configured threshold.
    pub async fn compact_if_needed(&self) -> Result<Option<CompactionStats>, SearchError> {
        let mut guard = self.acquire_write().await.map_err(SearchError::IndexError)?;
        let threshold = self.config.compaction_threshold;
        tokio::task::spawn_blocking(move || guard.compact_if_needed(threshold))
            .await
            .map_err(|e| SearchError::IndexError(format!("Compaction task failed: {}", e)))?
    }

    pub async fn stats(&self) -> IndexStats {
        self.store.read().await.stats()
    }

    /// Shared read snapshot for one search, waiting at most `channel_timeout`.
    async fn acquire_snapshot(&self) -> Result<Snapshot<L, V>, SearchError> {
        let timeout = self.config.channel_timeout();
        match tokio::time::timeout(timeout, self.store.clone().read_owned()).await {
            Ok(guard) => Ok(Arc::new(guard)),
            Err(_) => {
                self.metrics.record_unavailable_search();
                Err(SearchError::SearchUnavailable(format!(
                    "index snapshot not available within {:?}",
                    timeout
                )))
            }
        }
    }

    /// Takes the write lock without joining the lock's queue.
    ///
    /// Retries `try_write_owned` with a growing pause so readers that arrive
    /// meanwhile are never held back. Gives up after `write_timeout`.
    async fn acquire_write(&self) -> Result<WriteGuard<L, V>, String> {
        let timeout = self.config.write_timeout();
        let poll = async {
            let mut pause = Duration::from_millis(1);
            loop {
                if let Ok(guard) = self.store.clone().try_write_owned() {
                    return guard;
                }
                tokio::time::sleep(pause).await;
                pause = (pause * 2).min(WRITE_POLL_MAX);
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| format!("write lock not available within {:?}", timeout))
    }

    /// Runs both channels on `snapshot` and fuses whatever answered.
    async fn retrieve(
        &self,
        snapshot: &Snapshot<L, V>,
        query_text: &str,
        depth: usize,
    ) -> Result<Retrieval, SearchError> {
        let timeout = self.config.channel_timeout();

        let lexical = {
            let snapshot = snapshot.clone();
            let query = query_text.to_string();
            run_channel(Channel::Lexical, timeout, move || {
                snapshot.lexical().search(&query, depth)
            })
        };
        let semantic = {
            let snapshot = snapshot.clone();
            let query = query_text.to_string();
            run_channel(Channel::Semantic, timeout, move || {
                snapshot.semantic().search(&query, depth)
            })
        };
        let (lexical, semantic) = tokio::join!(lexical, semantic);

        let (lexical, semantic) = match (lexical, semantic) {
            (Err(l), Err(s)) => {
                warn!("{}", l);
                warn!("{}", s);
                self.metrics.record_unavailable_search();
                return Err(SearchError::SearchUnavailable(format!("{}; {}", l, s)));
            }
            (l, s) => {
                for err in [l.as_ref().err(), s.as_ref().err()].into_iter().flatten() {
                    warn!("{}, continuing with the remaining channel", err);
                    self.metrics.record_degraded_search();
                }
                (l.ok(), s.ok())
            }
        };

        let fusion_start = Instant::now();
        let lists: Vec<Vec<RankedHit>> = [&lexical, &semantic]
            .into_iter()
            .flatten()
            .map(|(hits, _)| hits.clone())
            .collect();
        let fused = reciprocal_rank_fusion(&lists, self.config.rrf_k);
        let fusion_ms = elapsed_ms(fusion_start);

        let scores = |channel: &Option<(Vec<RankedHit>, f64)>| -> HashMap<DocId, f32> {
            channel
                .iter()
                .flat_map(|(hits, _)| hits.iter().map(|h| (h.id.clone(), h.score)))
                .collect()
        };

        debug!(
            lexical = lexical.as_ref().map(|(h, _)| h.len()),
            semantic = semantic.as_ref().map(|(h, _)| h.len()),
            fused = fused.len(),
            "Fused channel results"
        );

        Ok(Retrieval {
            lexical_scores: scores(&lexical),
            semantic_scores: scores(&semantic),
            lexical_ms: lexical.as_ref().map(|(_, ms)| *ms),
            semantic_ms: semantic.as_ref().map(|(_, ms)| *ms),
            fused,
            fusion_ms,
        })
    }

    /// Reranks `candidates` down to `top_k`, or truncates the fused order if the
    /// reranker is missing, fails or overruns its time budget.
    async fn rerank_or_fallback(
        &self,
        query: &str,
        mut candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> (Vec<SearchResult>, Option<f64>) {
        let reranker = match &self.reranker {
            Some(r) if !candidates.is_empty() => r.clone(),
            _ => {
                candidates.truncate(top_k);
                return (candidates, None);
            }
        };

        let start = Instant::now();
        let fallback = candidates.clone();
        let query_owned = query.to_string();
        let max_chars = self.config.rerank_max_chars;
        let task = tokio::task::spawn_blocking(move || {
            rerank_candidates(reranker.as_ref(), &query_owned, candidates, top_k, max_chars)
        });

        let timeout = self.config.rerank_timeout();
        let error = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(results))) => return (results, Some(elapsed_ms(start))),
            Ok(Ok(Err(e))) => SearchError::RerankerUnavailable(e.to_string()),
            Ok(Err(e)) => SearchError::RerankerUnavailable(format!("rerank task failed: {}", e)),
            Err(_) => SearchError::RerankerUnavailable(format!("timed out after {:?}", timeout)),
        };

        warn!("{}, returning fused order", error);
        self.metrics.record_reranker_fallback();
        let mut results = fallback;
        results.truncate(top_k);
        (results, None)
    }
}

fn validate_query(query_text: &str, top_k: usize) -> Result<(), SearchError> {
    if query_text.trim().is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    if top_k == 0 {
        return Err(SearchError::InvalidQuery(
            "Number of results (top_k) must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn sum_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}

/// Runs one channel search on a blocking task with a bounded wait.
///
/// Errors, panics and timeouts all map to [`SearchError::ChannelUnavailable`].
async fn run_channel<F>(
    channel: Channel,
    timeout: Duration,
    search: F,
) -> Result<(Vec<RankedHit>, f64), SearchError>
where
    F: FnOnce() -> Result<Vec<RankedHit>, SearchError> + Send + 'static,
{
    let start = Instant::now();
    let reason = match tokio::time::timeout(timeout, tokio::task::spawn_blocking(search)).await {
        Ok(Ok(Ok(hits))) => return Ok((hits, elapsed_ms(start))),
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(e)) => format!("search task failed: {}", e),
        Err(_) => format!("timed out after {:?}", timeout),
    };
    Err(SearchError::ChannelUnavailable { channel, reason })
}

/// Attaches records and per-channel scores to the fused top `depth`.
fn hydrate<L, V>(
    snapshot: &DocumentStore<L, V>,
    retrieval: &Retrieval,
    depth: usize,
) -> Vec<SearchResult>
where
    L: SearchIndex + DocumentLookup,
    V: SearchIndex,
{
    let mut results = Vec::with_capacity(depth.min(retrieval.fused.len()));
    for hit in retrieval.fused.iter().take(depth) {
        match snapshot.get(&hit.id) {
            Some(document) => results.push(SearchResult {
                document,
                lexical_score: retrieval.lexical_scores.get(&hit.id).copied(),
                semantic_score: retrieval.semantic_scores.get(&hit.id).copied(),
                fused_score: hit.fused_score,
                rerank_score: None,
            }),
            None => {
                // Semantic-only orphan left by a failed compensation
                warn!("Document {} not found in record store, skipping", hit.id);
            }
        }
    }
    results
}
