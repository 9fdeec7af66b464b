//! Search command implementation.
//!
//! Handles loading the search engine and executing queries against existing indexes.

use crate::config;
use anyhow::{anyhow, Context, Result};
use briefsearch_core::config::SearchConfig;
use briefsearch_core::embedding::{Embedder, HashingEmbedder};
use briefsearch_core::search::{ConsistencyReport, HybridSearchEngine, IndexStats, SearchResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Embedding model for the semantic channel.
///
/// Must match the model the index was built with; opening an index under a
/// different one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EmbedderKind {
    /// Feature hashing over words and character trigrams
    #[default]
    Hashing,
    /// all-MiniLM-L6-v2 sentence embeddings (downloaded on first use)
    #[cfg(feature = "neural-embedder")]
    Minilm,
}

impl EmbedderKind {
    fn load(self) -> Result<Arc<dyn Embedder>> {
        match self {
            EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
            #[cfg(feature = "neural-embedder")]
            EmbedderKind::Minilm => {
                use briefsearch_core::embedding::FastembedEmbedder;
                info!("Loading MiniLM embedding model...");
                let embedder = FastembedEmbedder::try_new()
                    .map_err(|e| anyhow!("Failed to load embedding model: {}", e))?;
                Ok(Arc::new(embedder))
            }
        }
    }
}

/// Reranking stage selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMode {
    /// Built-in term-overlap scorer
    TermOverlap,
    /// fastembed cross-encoder
    #[cfg(feature = "cross-encoder")]
    CrossEncoder,
    /// Return the fused order
    Off,
}

/// Opens the persisted engine in `data_dir`.
///
/// Fails when no index exists there, or when it was built with a different
/// embedder than the one the CLI uses.
pub fn open_engine(
    data_dir: Option<&PathBuf>,
    search_config: SearchConfig,
    embedder: EmbedderKind,
    rerank: RerankMode,
) -> Result<HybridSearchEngine> {
    let data_dir = config::get_data_dir(data_dir)?;
    if !config::index_exists(&data_dir) {
        return Err(anyhow!(
            "No index found at {}.\n\
             Please ingest some documents first.",
            data_dir.display()
        ));
    }

    info!("Opening indexes in {}", data_dir.display());
    let embedder = embedder.load()?;
    let engine = HybridSearchEngine::open_dir(search_config, embedder, &data_dir)
        .with_context(|| format!("Failed to open index at {}", data_dir.display()))?;

    let engine = match rerank {
        RerankMode::TermOverlap => engine,
        #[cfg(feature = "cross-encoder")]
        RerankMode::CrossEncoder => {
            use briefsearch_core::search::CrossEncoderReranker;
            info!("Loading cross-encoder reranker...");
            let reranker = CrossEncoderReranker::try_new()
                .map_err(|e| anyhow!("Failed to load cross-encoder: {}", e))?;
            engine.with_reranker(Arc::new(reranker))
        }
        RerankMode::Off => engine.without_reranker(),
    };
    Ok(engine)
}

/// Performs a search against the existing index.
///
/// With `expansions`, the query and each expansion are retrieved separately and
/// the merged candidates are reranked once against `query`.
///
/// # Arguments
///
/// * `engine` - Engine opened with [`open_engine`]
/// * `query` - The search query text
/// * `expansions` - Extra phrasings of the same information need
/// * `limit` - Maximum number of results to return
pub async fn execute_search(
    engine: &HybridSearchEngine,
    query: &str,
    expansions: &[String],
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let doc_count = engine.count().await;
    if doc_count == 0 {
        return Err(anyhow!(
            "Index is empty. Please ingest some documents first."
        ));
    }
    info!("Loaded index with {} documents", doc_count);

    info!("Searching for: \"{}\"", query);
    let results = if expansions.is_empty() {
        engine.search(query, limit).await
    } else {
        let mut queries = Vec::with_capacity(expansions.len() + 1);
        queries.push(query.to_string());
        queries.extend(expansions.iter().cloned());
        engine.search_expanded(query, &queries, limit).await
    }
    .map_err(|e| anyhow!("Search failed: {}", e))?;

    info!("Found {} results", results.len());
    Ok(results)
}

/// Index sizes and consistency, for `--status`.
pub async fn execute_status(engine: &HybridSearchEngine) -> (IndexStats, ConsistencyReport) {
    (engine.stats().await, engine.check_consistency().await)
}

/// Reconciles the indexes, for `--repair`. Returns the state before and after.
pub async fn execute_repair(engine: &HybridSearchEngine) -> (ConsistencyReport, ConsistencyReport) {
    let before = engine.repair().await;
    let after = engine.check_consistency().await;
    (before, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefsearch_core::search::Document;

    #[test]
    fn test_open_missing_index() {
        let result = open_engine(
            Some(&PathBuf::from("/nonexistent/path")),
            SearchConfig::default(),
            EmbedderKind::Hashing,
            RerankMode::TermOverlap,
        );
        let err = result.err().unwrap().to_string();
        assert!(err.contains("No index found"));
    }

    #[tokio::test]
    async fn test_search_persisted_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = HybridSearchEngine::open_dir(
                SearchConfig::default(),
                Arc::new(HashingEmbedder::default()),
                dir.path(),
            )
            .unwrap();
            engine
                .add_document(Document::new(
                    "pmid-1",
                    "Statins",
                    "statin therapy for primary prevention in older adults",
                ))
                .await
                .unwrap();
        }

        let data_dir = dir.path().to_path_buf();
        let engine = open_engine(
            Some(&data_dir),
            SearchConfig::default(),
            EmbedderKind::Hashing,
            RerankMode::Off,
        )
        .unwrap();

        let results = execute_search(&engine, "statin therapy", &[], 5)
            .await
            .unwrap();
        assert_eq!(results[0].id().as_str(), "pmid-1");

        let expanded = execute_search(
            &engine,
            "cholesterol",
            &["statin prevention".to_string()],
            5,
        )
        .await
        .unwrap();
        assert_eq!(expanded[0].id().as_str(), "pmid-1");

        let (stats, report) = execute_status(&engine).await;
        assert_eq!(stats.documents, 1);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_open_with_other_embedder_fails() {
        let dir = tempfile::tempdir().unwrap();
        drop(
            HybridSearchEngine::open_dir(
                SearchConfig::default(),
                Arc::new(HashingEmbedder::new(64)),
                dir.path(),
            )
            .unwrap(),
        );

        let data_dir = dir.path().to_path_buf();
        let err = open_engine(
            Some(&data_dir),
            SearchConfig::default(),
            EmbedderKind::Hashing,
            RerankMode::Off,
        )
        .err()
        .unwrap();
        assert!(format!("{:#}", err).contains("mismatch"));
    }

    #[tokio::test]
    async fn test_search_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        drop(
            HybridSearchEngine::open_dir(
                SearchConfig::default(),
                Arc::new(HashingEmbedder::default()),
                dir.path(),
            )
            .unwrap(),
        );

        let data_dir = dir.path().to_path_buf();
        let engine = open_engine(
            Some(&data_dir),
            SearchConfig::default(),
            EmbedderKind::Hashing,
            RerankMode::Off,
        )
        .unwrap();
        let err = execute_search(&engine, "anything", &[], 5).await.unwrap_err();
        assert!(err.to_string().contains("Index is empty"));
    }
}
