//! Dual-index document store.
//!
//! Every write lands in the lexical index first and the semantic index second.
//! If the second half fails the first half is compensated, so an id is either
//! in both indexes or in neither. A compensation that itself fails leaves the
//! id in a pending-repair set until [`DocumentStore::repair`] reconciles it.
//!
//! The store takes `&mut self` for writes and is not internally synchronized;
//! [`HybridSearchEngine`](super::HybridSearchEngine) wraps it in a lock so
//! readers never observe a write between its two halves.

use super::channel::{DocumentLookup, IndexEntry, SearchIndex};
use super::keyword::LexicalIndex;
use super::types::{
    CompactionStats, ConsistencyReport, DocId, Document, IndexStats, IndexingStage, SearchError,
};
use super::vector::SemanticIndex;
use crate::embedding::Embedder;
use instant::Instant;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Progress of one dual-index write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    /// Nothing applied yet
    Uncommitted,
    /// Lexical half applied, semantic pending
    LexicalApplied,
    /// Both halves applied
    Committed,
    /// Lexical half undone after the semantic half failed
    RolledBack,
}

/// Canonical document records plus the two retrieval indexes built over them.
pub struct DocumentStore<L = LexicalIndex, V = SemanticIndex> {
    lexical: L,
    semantic: V,
    embedder: Arc<dyn Embedder>,
    /// Ids whose last write could not be compensated
    pending_repair: BTreeSet<DocId>,
}

impl<L, V> DocumentStore<L, V>
where
    L: SearchIndex + DocumentLookup,
    V: SearchIndex,
{
    /// Assembles a store over existing indexes.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::EmbeddingMismatch`] if the semantic index was
    /// built with a different embedder than `embedder`.
    pub fn new(lexical: L, semantic: V, embedder: Arc<dyn Embedder>) -> Result<Self, SearchError> {
        let fingerprint = embedder.fingerprint();
        if let Some(indexed) = semantic.embedder_fingerprint() {
            if indexed != fingerprint {
                return Err(SearchError::EmbeddingMismatch {
                    expected: indexed.to_string(),
                    actual: fingerprint.to_string(),
                });
            }
        }

        let store = Self {
            lexical,
            semantic,
            embedder,
            pending_repair: BTreeSet::new(),
        };

        let report = store.check_consistency();
        if !report.is_consistent() {
            warn!(
                lexical_only = report.lexical_only.len(),
                semantic_only = report.semantic_only.len(),
                "Indexes disagree on open, run repair to reconcile"
            );
        }
        Ok(store)
    }

    pub fn lexical(&self) -> &L {
        &self.lexical
    }

    pub fn semantic(&self) -> &V {
        &self.semantic
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Indexes `doc` in both channels, replacing any record with the same id.
    ///
    /// # Errors
    ///
    /// - [`SearchError::InvalidDocument`] if a required field is blank
    /// - [`SearchError::IndexingFailure`] if embedding or either index write
    ///   fails; `rolled_back` reports whether both indexes were restored
    #[instrument(skip_all, fields(id = %doc.id))]
    pub fn add_document(&mut self, doc: Document) -> Result<(), SearchError> {
        doc.validate()?;

        let embedding = self.embed(&doc)?;
        let prior = self.lexical.document(&doc.id);
        let entry = IndexEntry {
            document: &doc,
            embedding: &embedding,
        };

        let mut state = WriteState::Uncommitted;
        if let Err(e) = self.lexical.upsert(entry) {
            warn!(state = ?state, "Lexical write failed: {}", e);
            return Err(SearchError::IndexingFailure {
                id: doc.id.clone(),
                stage: IndexingStage::Lexical,
                rolled_back: true,
                reason: e.to_string(),
            });
        }
        state = WriteState::LexicalApplied;

        if let Err(e) = self.semantic.upsert(entry) {
            warn!(state = ?state, "Semantic write failed, compensating lexical: {}", e);
            let rolled_back = self.undo_lexical(&doc.id, prior.as_ref());
            if rolled_back {
                state = WriteState::RolledBack;
            }
            debug!(state = ?state, "Write aborted");
            return Err(SearchError::IndexingFailure {
                id: doc.id.clone(),
                stage: IndexingStage::Semantic,
                rolled_back,
                reason: e.to_string(),
            });
        }
        state = WriteState::Committed;

        self.pending_repair.remove(&doc.id);
        debug!(state = ?state, replaced = prior.is_some(), "Indexed document");
        Ok(())
    }

    /// Removes `id` from both indexes. Returns whether it was present in either.
    #[instrument(skip(self))]
    pub fn remove_document(&mut self, id: &DocId) -> Result<bool, SearchError> {
        let prior = self.lexical.document(id);
        let in_semantic = self.semantic.contains(id);
        if prior.is_none() && !in_semantic {
            self.pending_repair.remove(id);
            return Ok(false);
        }

        let mut state = WriteState::Uncommitted;
        if prior.is_some() {
            if let Err(e) = self.lexical.remove(id) {
                warn!(state = ?state, "Lexical remove failed: {}", e);
                return Err(SearchError::IndexingFailure {
                    id: id.clone(),
                    stage: IndexingStage::Lexical,
                    rolled_back: true,
                    reason: e.to_string(),
                });
            }
            state = WriteState::LexicalApplied;
        }

        if in_semantic {
            if let Err(e) = self.semantic.remove(id) {
                warn!(state = ?state, "Semantic remove failed, compensating lexical: {}", e);
                let rolled_back = match &prior {
                    Some(doc) => self.restore_lexical(doc),
                    None => true,
                };
                if rolled_back {
                    state = WriteState::RolledBack;
                }
                debug!(state = ?state, "Remove aborted");
                return Err(SearchError::IndexingFailure {
                    id: id.clone(),
                    stage: IndexingStage::Semantic,
                    rolled_back,
                    reason: e.to_string(),
                });
            }
        }
        state = WriteState::Committed;

        self.pending_repair.remove(id);
        debug!(state = ?state, "Removed document");
        Ok(true)
    }

    /// Canonical record for `id`.
    pub fn get(&self, id: &DocId) -> Option<Document> {
        self.lexical.document(id)
    }

    /// Number of distinct indexed documents.
    pub fn count(&self) -> usize {
        self.lexical.len()
    }

    /// Compares the id sets of both indexes.
    pub fn check_consistency(&self) -> ConsistencyReport {
        let lexical: BTreeSet<DocId> = self.lexical.ids().into_iter().collect();
        let semantic: BTreeSet<DocId> = self.semantic.ids().into_iter().collect();

        ConsistencyReport {
            lexical_only: lexical.difference(&semantic).cloned().collect(),
            semantic_only: semantic.difference(&lexical).cloned().collect(),
            pending_repair: self.pending_repair.iter().cloned().collect(),
        }
    }

    /// Reconciles the indexes with the canonical records.
    ///
    /// Every inconsistent or pending id is re-embedded from its lexical record
    /// into the semantic index, or dropped from the semantic index when no
    /// record exists. Ids that still fail stay pending. Returns what was found
    /// before repairing.
    #[instrument(skip(self))]
    pub fn repair(&mut self) -> ConsistencyReport {
        let report = self.check_consistency();

        let targets: BTreeSet<DocId> = report
            .lexical_only
            .iter()
            .chain(&report.semantic_only)
            .chain(&report.pending_repair)
            .cloned()
            .collect();

        let mut repaired = 0;
        for id in targets {
            match self.repair_one(&id) {
                Ok(()) => {
                    self.pending_repair.remove(&id);
                    repaired += 1;
                }
                Err(e) => {
                    error!(id = %id, "Repair failed: {}", e);
                    self.pending_repair.insert(id);
                }
            }
        }

        info!(
            repaired,
            still_pending = self.pending_repair.len(),
            "Repair complete"
        );
        report
    }

    fn repair_one(&mut self, id: &DocId) -> Result<(), SearchError> {
        match self.lexical.document(id) {
            Some(doc) => {
                let embedding = self.embed(&doc)?;
                self.semantic.upsert(IndexEntry {
                    document: &doc,
                    embedding: &embedding,
                })
            }
            None => self.semantic.remove(id).map(|_| ()),
        }
    }

    /// Compacts any index whose dead-entry ratio exceeds `threshold`.
    ///
    /// Returns `None` when no index needed it.
    pub fn compact_if_needed(
        &mut self,
        threshold: f32,
    ) -> Result<Option<CompactionStats>, SearchError> {
        let lexical_due = self.lexical.dead_ratio() > threshold;
        let semantic_due = self.semantic.dead_ratio() > threshold;
        if !lexical_due && !semantic_due {
            return Ok(None);
        }

        let start = Instant::now();
        let entries_before = self.entry_count();
        let mut tombstones_removed = 0;
        if lexical_due {
            tombstones_removed += self.lexical.compact()?;
        }
        if semantic_due {
            tombstones_removed += self.semantic.compact()?;
        }

        let stats = CompactionStats {
            entries_before,
            entries_after: self.entry_count(),
            tombstones_removed,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            tombstones_removed = stats.tombstones_removed,
            duration_ms = stats.duration_ms,
            "Compacted indexes"
        );
        Ok(Some(stats))
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.count(),
            lexical_entries: self.lexical.len(),
            semantic_entries: self.semantic.len(),
            tombstones: self.lexical.dead_entries() + self.semantic.dead_entries(),
            pending_repair: self.pending_repair.len(),
        }
    }

    fn entry_count(&self) -> usize {
        self.lexical.len()
            + self.lexical.dead_entries()
            + self.semantic.len()
            + self.semantic.dead_entries()
    }

    fn embed(&self, doc: &Document) -> Result<Vec<f32>, SearchError> {
        let failure = |reason: String| SearchError::IndexingFailure {
            id: doc.id.clone(),
            stage: IndexingStage::Embedding,
            rolled_back: true,
            reason,
        };

        let embedding = self
            .embedder
            .embed(&doc.abstract_text)
            .map_err(|e| failure(e.to_string()))?;
        if embedding.len() != self.embedder.embedding_dim() {
            return Err(failure(format!(
                "Embedder returned {} dimensions, expected {}",
                embedding.len(),
                self.embedder.embedding_dim()
            )));
        }
        Ok(embedding)
    }

    /// Reverts the lexical half of an add. Returns whether it succeeded.
    fn undo_lexical(&mut self, id: &DocId, prior: Option<&Document>) -> bool {
        match prior {
            Some(doc) => self.restore_lexical(doc),
            None => match self.lexical.remove(id) {
                Ok(_) => true,
                Err(e) => {
                    self.mark_pending(id, &e);
                    false
                }
            },
        }
    }

    fn restore_lexical(&mut self, doc: &Document) -> bool {
        let entry = IndexEntry {
            document: doc,
            embedding: &[],
        };
        match self.lexical.upsert(entry) {
            Ok(()) => true,
            Err(e) => {
                self.mark_pending(&doc.id, &e);
                false
            }
        }
    }

    fn mark_pending(&mut self, id: &DocId, cause: &SearchError) {
        error!(id = %id, "Compensation failed, indexes disagree until repair: {}", cause);
        self.pending_repair.insert(id.clone());
    }
}

impl DocumentStore<LexicalIndex, SemanticIndex> {
    /// Empty store over in-memory indexes.
    pub fn in_memory(embedder: Arc<dyn Embedder>, min_similarity: f32) -> Self {
        Self {
            lexical: LexicalIndex::in_memory(),
            semantic: SemanticIndex::in_memory(embedder.clone(), min_similarity),
            embedder,
            pending_repair: BTreeSet::new(),
        }
    }
}
