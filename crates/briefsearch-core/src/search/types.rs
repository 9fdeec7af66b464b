//! Core types for hybrid search: documents, hits, results and errors.

use crate::config::ConfigError;
use crate::embedding::EmbeddingFingerprint;
use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Caller-supplied document identifier, unique across the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Category of a source document.
///
/// Serialized as its snake_case label. Labels outside the known set round-trip
/// through [`SourceType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    ClinicalGuideline,
    Study,
    Review,
    SystematicReview,
    MetaAnalysis,
    Rct,
    CohortStudy,
    ObservationalStudy,
    CrossSectionalStudy,
    ValidationStudy,
    #[default]
    Article,
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::ClinicalGuideline => "clinical_guideline",
            SourceType::Study => "study",
            SourceType::Review => "review",
            SourceType::SystematicReview => "systematic_review",
            SourceType::MetaAnalysis => "meta_analysis",
            SourceType::Rct => "rct",
            SourceType::CohortStudy => "cohort_study",
            SourceType::ObservationalStudy => "observational_study",
            SourceType::CrossSectionalStudy => "cross_sectional_study",
            SourceType::ValidationStudy => "validation_study",
            SourceType::Article => "article",
            SourceType::Other(label) => label,
        }
    }
}

impl From<String> for SourceType {
    fn from(label: String) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "clinical_guideline" => SourceType::ClinicalGuideline,
            "study" => SourceType::Study,
            "review" => SourceType::Review,
            "systematic_review" => SourceType::SystematicReview,
            "meta_analysis" => SourceType::MetaAnalysis,
            "rct" => SourceType::Rct,
            "cohort_study" => SourceType::CohortStudy,
            "observational_study" => SourceType::ObservationalStudy,
            "cross_sectional_study" => SourceType::CrossSectionalStudy,
            "validation_study" => SourceType::ValidationStudy,
            "article" | "" => SourceType::Article,
            _ => SourceType::Other(label),
        }
    }
}

impl From<&str> for SourceType {
    fn from(label: &str) -> Self {
        SourceType::from(label.to_string())
    }
}

impl From<SourceType> for String {
    fn from(source_type: SourceType) -> String {
        source_type.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality score assigned when ingestion supplies none.
pub const DEFAULT_QUALITY_SCORE: f32 = 0.5;

fn default_quality_score() -> f32 {
    DEFAULT_QUALITY_SCORE
}

/// A clinical document as handed to ingestion and returned from search.
///
/// The embedding is never part of the document: it is derived from
/// `abstract_text` by the engine's embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    /// Body text indexed by both channels.
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default = "default_quality_score")]
    pub quality_score: f32,
}

impl Document {
    pub fn new(
        id: impl Into<DocId>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            authors: Vec::new(),
            source_type: SourceType::default(),
            quality_score: DEFAULT_QUALITY_SCORE,
        }
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_type(mut self, source_type: impl Into<SourceType>) -> Self {
        self.source_type = source_type.into();
        self
    }

    pub fn with_quality_score(mut self, quality_score: f32) -> Self {
        self.quality_score = quality_score;
        self
    }

    /// Text scored by the lexical channel.
    pub fn lexical_text(&self) -> String {
        format!("{}\n{}", self.title, self.abstract_text)
    }

    /// Rejects documents that cannot be indexed.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.id.as_str().trim().is_empty() {
            return Err(SearchError::InvalidDocument(
                "Document id cannot be empty".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(SearchError::InvalidDocument(format!(
                "Document {} has an empty title",
                self.id
            )));
        }
        if self.abstract_text.trim().is_empty() {
            return Err(SearchError::InvalidDocument(format!(
                "Document {} has an empty abstract",
                self.id
            )));
        }
        if !self.quality_score.is_finite() {
            return Err(SearchError::InvalidDocument(format!(
                "Document {} has a non-finite quality score",
                self.id
            )));
        }
        Ok(())
    }
}

/// A retrieval channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Lexical,
    Semantic,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Lexical => f.write_str("lexical"),
            Channel::Semantic => f.write_str("semantic"),
        }
    }
}

/// One entry of a channel's ranked list. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub id: DocId,
    pub channel: Channel,
    pub rank: usize,
    /// Channel-native score (BM25 score or cosine similarity).
    pub score: f32,
}

/// One entry of the fused ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    pub id: DocId,
    pub fused_score: f32,
    /// Channels whose lists contained this document.
    pub channels: Vec<Channel>,
    /// Lowest (best) rank across contributing channels.
    pub best_rank: usize,
}

/// A search result handed to the synthesis stage.
///
/// Each stage score is `None` when that stage did not score the document:
/// a channel that did not return it, was unavailable, or a reranker that was
/// skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub document: Document,
    pub lexical_score: Option<f32>,
    pub semantic_score: Option<f32>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

impl SearchResult {
    pub fn id(&self) -> &DocId {
        &self.document.id
    }

    /// Score of the last stage that ordered this result.
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

/// Write phase at which indexing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStage {
    Embedding,
    Lexical,
    Semantic,
}

impl fmt::Display for IndexingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexingStage::Embedding => f.write_str("embedding"),
            IndexingStage::Lexical => f.write_str("lexical"),
            IndexingStage::Semantic => f.write_str("semantic"),
        }
    }
}

/// Errors that can occur during indexing and search.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Query text cannot be empty")]
    EmptyQuery,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// When `rolled_back` is true both indexes hold what they held before the
    /// call. Otherwise the id is queued for repair.
    #[error("Indexing of {id} failed at {stage} stage (rolled back: {rolled_back}): {reason}")]
    IndexingFailure {
        id: DocId,
        stage: IndexingStage,
        rolled_back: bool,
        reason: String,
    },

    #[error("{channel} channel unavailable: {reason}")]
    ChannelUnavailable { channel: Channel, reason: String },

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Reranker unavailable: {0}")]
    RerankerUnavailable(String),

    #[error("Embedding model mismatch: index built with {expected}, engine uses {actual}")]
    EmbeddingMismatch { expected: String, actual: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Index error: {0}")]
    IndexError(String),
}

impl From<ConfigError> for SearchError {
    fn from(err: ConfigError) -> Self {
        SearchError::InvalidConfig(err.to_string())
    }
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        SearchError::StorageError(err.to_string())
    }
}

/// Validates that an embedding has the expected dimension.
///
/// # Errors
///
/// Returns `SearchError::DimensionMismatch` if `actual != expected`.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<(), SearchError> {
    if expected != actual {
        return Err(SearchError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Current on-disk layout version of the semantic index.
pub const SCHEMA_VERSION: u32 = 1;

/// Persisted alongside semantic embeddings to detect incompatible reopen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub schema_version: u32,
    pub embedder: EmbeddingFingerprint,
}

impl IndexManifest {
    pub fn new(embedder: EmbeddingFingerprint) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            embedder,
        }
    }

    /// True when embeddings written under this manifest can be searched with
    /// vectors from `embedder`.
    pub fn is_compatible(&self, embedder: &EmbeddingFingerprint) -> bool {
        self.schema_version == SCHEMA_VERSION && &self.embedder == embedder
    }
}

/// Outcome of a full scan of both indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Ids present only in the lexical index.
    pub lexical_only: Vec<DocId>,
    /// Ids present only in the semantic index.
    pub semantic_only: Vec<DocId>,
    /// Ids whose last write could not be compensated.
    pub pending_repair: Vec<DocId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.lexical_only.is_empty() && self.semantic_only.is_empty()
    }
}

/// Statistics from a compaction operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionStats {
    pub entries_before: usize,
    pub entries_after: usize,
    pub tombstones_removed: usize,
    pub duration_ms: u64,
}

/// Index sizes and health at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: usize,
    pub lexical_entries: usize,
    pub semantic_entries: usize,
    pub tombstones: usize,
    pub pending_repair: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_defaults() {
        let doc = Document::new("pmid-1", "Title", "Body text");
        assert_eq!(doc.source_type, SourceType::Article);
        assert_eq!(doc.quality_score, 0.5);
        assert!(doc.authors.is_empty());
    }

    #[test]
    fn test_document_json_defaults_missing_fields() {
        let doc: Document =
            serde_json::from_str(r#"{"id":"a","title":"T","abstract":"B"}"#).unwrap();
        assert_eq!(doc.quality_score, DEFAULT_QUALITY_SCORE);
        assert_eq!(doc.source_type, SourceType::Article);
    }

    #[test]
    fn test_source_type_labels() {
        assert_eq!(SourceType::from("meta_analysis"), SourceType::MetaAnalysis);
        assert_eq!(SourceType::from("RCT"), SourceType::Rct);
        assert_eq!(
            SourceType::from("case_report"),
            SourceType::Other("case_report".to_string())
        );

        let json = serde_json::to_string(&SourceType::ClinicalGuideline).unwrap();
        assert_eq!(json, "\"clinical_guideline\"");
        let unknown: SourceType = serde_json::from_str("\"preprint\"").unwrap();
        assert_eq!(unknown.as_str(), "preprint");
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(matches!(
            Document::new("  ", "T", "B").validate(),
            Err(SearchError::InvalidDocument(_))
        ));
        assert!(matches!(
            Document::new("a", "", "B").validate(),
            Err(SearchError::InvalidDocument(_))
        ));
        assert!(matches!(
            Document::new("a", "T", " \n").validate(),
            Err(SearchError::InvalidDocument(_))
        ));
        assert!(Document::new("a", "T", "B").validate().is_ok());
    }

    #[test]
    fn test_search_result_flattens_document() {
        let result = SearchResult {
            document: Document::new("a", "T", "B"),
            lexical_score: Some(1.5),
            semantic_score: None,
            fused_score: 0.016,
            rerank_score: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["id"], "a");
        assert_eq!(value["abstract"], "B");
        assert!(value["semantic_score"].is_null());
        assert_eq!(result.score(), 0.016);
    }

    #[test]
    fn test_validate_dimension() {
        assert!(validate_dimension(3, 3).is_ok());
        assert!(matches!(
            validate_dimension(3, 2),
            Err(SearchError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_manifest_compatibility() {
        let fp = EmbeddingFingerprint::new("hashing-v1", 384);
        let manifest = IndexManifest::new(fp.clone());
        assert!(manifest.is_compatible(&fp));
        assert!(!manifest.is_compatible(&EmbeddingFingerprint::new("hashing-v1", 128)));
        assert!(!manifest.is_compatible(&EmbeddingFingerprint::new("other", 384)));
    }
}
