//! Neural sentence embedder backed by fastembed (ONNX Runtime).
//!
//! Defaults to all-MiniLM-L6-v2, a 384-dimensional sentence-transformer. The
//! model is downloaded into fastembed's cache on first use.

use super::Embedder;
use crate::error::EmbeddingError;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;
use tracing::{debug, info};

/// Sentence embedder running a fastembed `TextEmbedding` model.
///
/// Inference needs exclusive access to the ONNX session, so calls are
/// serialized behind a mutex.
pub struct FastembedEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
    dimension: usize,
}

impl FastembedEmbedder {
    /// Loads all-MiniLM-L6-v2.
    pub fn try_new() -> Result<Self, EmbeddingError> {
        Self::with_model(EmbeddingModel::AllMiniLML6V2)
    }

    pub fn with_model(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
        let model_id = format!("fastembed/{:?}", model);
        let mut session = TextEmbedding::try_new(InitOptions::new(model))
            .map_err(|e| EmbeddingError::ModelUnavailable(format!("{}: {}", model_id, e)))?;

        // The output width is a property of the weights; read it off one pass
        let dimension = session
            .embed(vec!["dimension check"], None)
            .map_err(|e| EmbeddingError::ModelUnavailable(format!("{}: {}", model_id, e)))?
            .first()
            .map(Vec::len)
            .ok_or_else(|| {
                EmbeddingError::ModelUnavailable(format!("{} produced no embedding", model_id))
            })?;

        info!(model = %model_id, dimension, "Loaded embedding model");
        Ok(Self {
            model: Mutex::new(session),
            model_id,
            dimension,
        })
    }
}

impl Embedder for FastembedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embedding_dim(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }

        let mut model = self
            .model
            .lock()
            .map_err(|e| EmbeddingError::ModelUnavailable(format!("Lock poisoned: {}", e)))?;
        let embedding = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::InferenceFailed(e.to_string()))?
            .pop()
            .ok_or_else(|| EmbeddingError::InferenceFailed("no embedding returned".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        debug!(text_len = text.len(), "Embedded text");
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::search::{Document, HybridSearchEngine};
    use std::sync::Arc;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (norm(a) * norm(b))
    }

    #[test]
    #[ignore = "Downloads all-MiniLM-L6-v2 on first run"]
    fn test_minilm_embeds_paraphrases_close() {
        let embedder = FastembedEmbedder::try_new().unwrap();
        assert_eq!(embedder.embedding_dim(), 384);
        assert_eq!(embedder.fingerprint().model_id, "fastembed/AllMiniLML6V2");

        let query = embedder.embed("blood sugar control in older people").unwrap();
        let related = embedder
            .embed("glycemic targets for elderly diabetic patients")
            .unwrap();
        let unrelated = embedder.embed("surgical technique for knee replacement").unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));

        assert!(matches!(
            embedder.embed("  "),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    #[ignore = "Downloads all-MiniLM-L6-v2 on first run"]
    async fn test_minilm_finds_paraphrase_without_shared_terms() {
        let embedder = Arc::new(FastembedEmbedder::try_new().unwrap());
        let engine = HybridSearchEngine::new(SearchConfig::default(), embedder)
            .unwrap()
            .without_reranker();
        engine
            .add_document(Document::new(
                "A",
                "Glycemic targets",
                "glycemic targets for elderly diabetic patients",
            ))
            .await
            .unwrap();
        engine
            .add_document(Document::new(
                "B",
                "Knee arthroplasty",
                "surgical technique for knee replacement",
            ))
            .await
            .unwrap();

        let results = engine.search("blood sugar in older people", 1).await.unwrap();
        assert_eq!(results[0].id().as_str(), "A");
        assert!(results[0].lexical_score.is_none());
        assert!(results[0].semantic_score.is_some());
    }
}
