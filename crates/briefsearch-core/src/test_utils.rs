//! Fault-injection helpers shared by unit and integration tests.
//!
//! [`FaultyIndex`] wraps any [`SearchIndex`] and fails or stalls its calls on
//! demand, so degradation and compensation paths can be exercised without a
//! real broken backend.

use crate::embedding::EmbeddingFingerprint;
use crate::error::RerankError;
use crate::search::{
    Channel, DocId, Document, DocumentLookup, IndexEntry, RankedHit, Reranker, SearchError,
    SearchIndex,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
    fail_searches: AtomicBool,
    search_delay_ms: AtomicU64,
}

/// Remote control for a [`FaultyIndex`]. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch(Arc<Faults>);

impl FaultSwitch {
    pub fn fail_writes(&self, on: bool) {
        self.0.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, on: bool) {
        self.0.fail_removes.store(on, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, on: bool) {
        self.0.fail_searches.store(on, Ordering::SeqCst);
    }

    /// Makes every search block for `delay` before answering.
    pub fn delay_searches(&self, delay: Duration) {
        self.0
            .search_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

/// A [`SearchIndex`] whose calls can be made to fail or stall.
pub struct FaultyIndex<I> {
    inner: I,
    faults: FaultSwitch,
}

impl<I: SearchIndex> FaultyIndex<I> {
    pub fn new(inner: I) -> (Self, FaultSwitch) {
        let faults = FaultSwitch::default();
        (
            Self {
                inner,
                faults: faults.clone(),
            },
            faults,
        )
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    fn injected(&self, op: &str) -> SearchError {
        SearchError::IndexError(format!("injected {} failure on {}", op, self.inner.channel()))
    }
}

impl<I: SearchIndex> SearchIndex for FaultyIndex<I> {
    fn channel(&self) -> Channel {
        self.inner.channel()
    }

    fn upsert(&mut self, entry: IndexEntry<'_>) -> Result<(), SearchError> {
        if self.faults.0.fail_writes.load(Ordering::SeqCst) {
            return Err(self.injected("write"));
        }
        self.inner.upsert(entry)
    }

    fn remove(&mut self, id: &DocId) -> Result<bool, SearchError> {
        if self.faults.0.fail_removes.load(Ordering::SeqCst) {
            return Err(self.injected("remove"));
        }
        self.inner.remove(id)
    }

    fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<RankedHit>, SearchError> {
        let delay = self.faults.0.search_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.faults.0.fail_searches.load(Ordering::SeqCst) {
            return Err(self.injected("search"));
        }
        self.inner.search(query_text, top_k)
    }

    fn contains(&self, id: &DocId) -> bool {
        self.inner.contains(id)
    }

    fn ids(&self) -> Vec<DocId> {
        self.inner.ids()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn embedder_fingerprint(&self) -> Option<EmbeddingFingerprint> {
        self.inner.embedder_fingerprint()
    }

    fn compact(&mut self) -> Result<usize, SearchError> {
        self.inner.compact()
    }

    fn dead_entries(&self) -> usize {
        self.inner.dead_entries()
    }

    fn dead_ratio(&self) -> f32 {
        self.inner.dead_ratio()
    }
}

impl<I: DocumentLookup> DocumentLookup for FaultyIndex<I> {
    fn document(&self, id: &DocId) -> Option<Document> {
        self.inner.document(id)
    }
}

/// Reranker that always errors.
#[derive(Debug, Clone, Default)]
pub struct FailingReranker;

impl Reranker for FailingReranker {
    fn name(&self) -> &str {
        "failing"
    }

    fn score(&self, _query: &str, _documents: &[&str]) -> Result<Vec<f32>, RerankError> {
        Err(RerankError::ModelUnavailable("injected failure".to_string()))
    }
}

/// Reranker that stalls before scoring every document zero.
#[derive(Debug, Clone)]
pub struct SlowReranker(pub Duration);

impl Reranker for SlowReranker {
    fn name(&self) -> &str {
        "slow"
    }

    fn score(&self, _query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError> {
        std::thread::sleep(self.0);
        Ok(vec![0.0; documents.len()])
    }
}

/// Reranker that scores documents by reversed input order, so its effect on
/// the fused ranking is observable.
#[derive(Debug, Clone, Default)]
pub struct ReversingReranker;

impl Reranker for ReversingReranker {
    fn name(&self) -> &str {
        "reversing"
    }

    fn score(&self, _query: &str, documents: &[&str]) -> Result<Vec<f32>, RerankError> {
        Ok((0..documents.len()).map(|i| i as f32).collect())
    }
}
