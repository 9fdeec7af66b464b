//! BM25 lexical index over document titles and abstracts.
//!
//! This module wraps the [`bm25`](https://crates.io/crates/bm25) crate to provide
//! keyword-based retrieval. BM25 scores documents on:
//! - **Term Frequency (TF)**: How often query terms appear in the document
//! - **Inverse Document Frequency (IDF)**: Rarity of terms across the corpus
//! - **Document Length**: Normalized to avoid bias toward longer documents
//!
//! Tokenization uses English stemming and stop-word removal, so "diabetes"
//! and "diabetic" share a term.
//!
//! The index also owns the canonical [`Document`] records. Each record is
//! persisted as JSON in the index's [`IndexStore`] and the BM25 corpus is
//! rebuilt from a full scan on open.
//!
//! # Usage
//!
//! ```
//! use briefsearch_core::search::keyword::LexicalIndex;
//! use briefsearch_core::search::{Document, IndexEntry, SearchIndex};
//!
//! let mut index = LexicalIndex::in_memory();
//! let doc = Document::new("pmid-1", "Statins", "statin therapy in older adults");
//! index.upsert(IndexEntry { document: &doc, embedding: &[] }).unwrap();
//!
//! let hits = index.search("statin", 10).unwrap();
//! assert_eq!(hits[0].id.as_str(), "pmid-1");
//! ```

use super::channel::{rank_hits, sort_scored, DocumentLookup, IndexEntry, SearchIndex};
use super::types::{Channel, DocId, Document, RankedHit, SearchError};
use crate::storage::{InMemoryStore, IndexStore, StoreError};
use bm25::{Language, SearchEngineBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// BM25-based lexical index.
///
/// # Thread Safety
///
/// Reads take `&self` and may run concurrently; writes take `&mut self`. The
/// document store serializes writers.
pub struct LexicalIndex {
    /// BM25 search engine keyed by document id
    engine: bm25::SearchEngine<String>,
    /// Canonical records, ordered by id
    records: BTreeMap<DocId, Document>,
    store: Arc<dyn IndexStore>,
    /// Corpus size when the engine's average document length was last fitted
    fitted_len: usize,
}

impl LexicalIndex {
    /// Opens the index over `store`, loading every persisted record.
    pub fn open(store: Arc<dyn IndexStore>) -> Result<Self, SearchError> {
        let mut records = BTreeMap::new();
        for (key, bytes) in store.scan()? {
            let doc: Document = serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::SerializationError(format!("Corrupt lexical record {}: {}", key, e))
            })?;
            records.insert(doc.id.clone(), doc);
        }

        debug!(documents = records.len(), "Opened lexical index");

        Ok(Self {
            engine: build_engine(&records),
            fitted_len: records.len(),
            records,
            store,
        })
    }

    /// Creates an empty index backed by an [`InMemoryStore`].
    pub fn in_memory() -> Self {
        let records = BTreeMap::new();
        Self {
            engine: build_engine(&records),
            records,
            store: Arc::new(InMemoryStore::new()),
            fitted_len: 0,
        }
    }

    /// Rebuilds the engine so length normalization reflects the current corpus.
    ///
    /// Runs whenever the corpus has doubled since the last fit, which keeps
    /// the amortized cost per write constant.
    fn refit_if_grown(&mut self) {
        if self.records.len() >= (self.fitted_len * 2).max(1) {
            self.engine = build_engine(&self.records);
            self.fitted_len = self.records.len();
            debug!(documents = self.fitted_len, "Refitted BM25 corpus statistics");
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }
}

impl SearchIndex for LexicalIndex {
    fn channel(&self) -> Channel {
        Channel::Lexical
    }

    #[instrument(skip_all, fields(id = %entry.document.id, text_len = entry.document.abstract_text.len()))]
    fn upsert(&mut self, entry: IndexEntry<'_>) -> Result<(), SearchError> {
        let doc = entry.document;
        let bytes = serde_json::to_vec(doc).map_err(|e| {
            StoreError::SerializationError(format!("Document {}: {}", doc.id, e))
        })?;

        // Persist first: if this fails the in-memory index is untouched
        self.store.put(doc.id.as_str(), &bytes)?;

        self.engine.upsert(bm25::Document {
            id: doc.id.as_str().to_string(),
            contents: doc.lexical_text(),
        });
        self.records.insert(doc.id.clone(), doc.clone());
        self.refit_if_grown();
        Ok(())
    }

    fn remove(&mut self, id: &DocId) -> Result<bool, SearchError> {
        if !self.records.contains_key(id) {
            return Ok(false);
        }
        self.store.delete(id.as_str())?;
        self.engine.remove(&id.as_str().to_string());
        self.records.remove(id);
        Ok(true)
    }

    fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<RankedHit>, SearchError> {
        if query_text.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if top_k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        // Ask for every match so ties at the cut-off are broken by id, not by
        // the engine's internal order
        let mut scored: Vec<(DocId, f32)> = self
            .engine
            .search(query_text, self.records.len())
            .into_iter()
            .map(|result| (DocId::from(result.document.id), result.score))
            .collect();

        sort_scored(&mut scored);
        scored.truncate(top_k);

        debug!(query_len = query_text.len(), hits = scored.len(), "Lexical search");
        Ok(rank_hits(Channel::Lexical, scored))
    }

    fn contains(&self, id: &DocId) -> bool {
        self.records.contains_key(id)
    }

    fn ids(&self) -> Vec<DocId> {
        self.records.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

fn build_engine(records: &BTreeMap<DocId, Document>) -> bm25::SearchEngine<String> {
    let corpus: Vec<bm25::Document<String>> = records
        .values()
        .map(|doc| bm25::Document {
            id: doc.id.as_str().to_string(),
            contents: doc.lexical_text(),
        })
        .collect();
    SearchEngineBuilder::<String>::with_documents(Language::English, corpus).build()
}

impl DocumentLookup for LexicalIndex {
    fn document(&self, id: &DocId) -> Option<Document> {
        self.records.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(index: &mut LexicalIndex, id: &str, title: &str, body: &str) {
        let doc = Document::new(id, title, body);
        index
            .upsert(IndexEntry {
                document: &doc,
                embedding: &[],
            })
            .unwrap();
    }

    #[test]
    fn test_lexical_search() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "a", "Fox", "the quick brown fox jumps over the lazy dog");
        add(&mut index, "b", "Cat", "the lazy cat sleeps all day");
        add(&mut index, "c", "Rabbits", "quick brown rabbits hop in the garden");

        let hits = index.search("quick brown", 2).unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.id.as_str() != "b"));
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].rank, 2);
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "a", "T", "test document");

        assert!(matches!(index.search("", 10), Err(SearchError::EmptyQuery)));
        assert!(matches!(index.search("   ", 10), Err(SearchError::EmptyQuery)));
    }

    #[test]
    fn test_no_matching_terms_returns_empty() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "a", "Knee", "surgical technique for knee replacement");

        assert!(index.search("insulin", 10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = LexicalIndex::in_memory();
        assert!(index.search("query", 10).unwrap().is_empty());
    }

    #[test]
    fn test_stemming_matches_variants() {
        let mut index = LexicalIndex::in_memory();
        add(
            &mut index,
            "a",
            "Glycemic targets",
            "glycemic control targets for elderly diabetic patients",
        );

        let hits = index.search("diabetes elderly", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "a");
    }

    #[test]
    fn test_title_is_indexed() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "a", "Anticoagulation", "outcomes in a cohort");

        assert_eq!(index.search("anticoagulation", 5).unwrap().len(), 1);
    }

    #[test]
    fn test_case_insensitivity() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "a", "Hypertension", "Blood Pressure Management");

        assert!(!index.search("pressure", 1).unwrap().is_empty());
        assert!(!index.search("PRESSURE", 1).unwrap().is_empty());
        assert!(!index.search("PrEsSuRe", 1).unwrap().is_empty());
    }

    #[test]
    fn test_bm25_scoring() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "once", "A", "statin therapy");
        add(&mut index, "thrice", "B", "statin statin statin therapy outcomes");
        add(&mut index, "none", "C", "aspirin therapy");

        let hits = index.search("statin", 3).unwrap();
        let score = |id: &str| hits.iter().find(|h| h.id.as_str() == id).map(|h| h.score);

        assert!(score("none").is_none());
        assert!(score("thrice").unwrap() > score("once").unwrap());
        assert!(hits.iter().all(|h| h.score >= 0.0));
    }

    #[test]
    fn test_ties_broken_by_id() {
        let mut index = LexicalIndex::in_memory();
        // Identical text yields identical scores
        add(&mut index, "z", "Same", "metformin dosing");
        add(&mut index, "m", "Same", "metformin dosing");
        add(&mut index, "a", "Same", "metformin dosing");

        let hits = index.search("metformin", 2).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m"]);
    }

    #[test]
    fn test_upsert_replaces_content() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "a", "Old", "warfarin monitoring");
        add(&mut index, "a", "New", "apixaban dosing");

        assert_eq!(index.len(), 1);
        assert!(index.search("warfarin", 5).unwrap().is_empty());
        assert_eq!(index.search("apixaban", 5).unwrap().len(), 1);
        assert_eq!(index.document(&DocId::from("a")).unwrap().title, "New");
    }

    #[test]
    fn test_remove() {
        let mut index = LexicalIndex::in_memory();
        add(&mut index, "a", "T", "influenza vaccination");

        assert!(index.remove(&DocId::from("a")).unwrap());
        assert!(!index.remove(&DocId::from("a")).unwrap());
        assert!(index.is_empty());
        assert!(index.search("influenza", 5).unwrap().is_empty());
        assert!(index.store().is_empty().unwrap());
    }

    #[test]
    fn test_reopen_from_store() {
        let store: Arc<dyn IndexStore> = Arc::new(InMemoryStore::new());
        {
            let mut index = LexicalIndex::open(store.clone()).unwrap();
            add(&mut index, "a", "Sepsis", "early antibiotics in sepsis");
            add(&mut index, "b", "Stroke", "thrombolysis after stroke");
        }

        let index = LexicalIndex::open(store).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.ids(), vec![DocId::from("a"), DocId::from("b")]);
        assert_eq!(index.search("sepsis", 5).unwrap()[0].id.as_str(), "a");
    }

    #[test]
    fn test_corrupt_record_fails_open() {
        let store: Arc<dyn IndexStore> = Arc::new(InMemoryStore::new());
        store.put("a", b"not json").unwrap();

        let err = LexicalIndex::open(store).err().unwrap();
        assert!(matches!(err, SearchError::StorageError(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_search_returns_top_k() {
        let mut index = LexicalIndex::in_memory();
        for i in 0..10 {
            add(&mut index, &format!("doc-{i}"), "Trial", &format!("trial number {i}"));
        }

        assert_eq!(index.search("trial", 3).unwrap().len(), 3);
        assert!(index.search("trial", 0).unwrap().is_empty());
    }
}
