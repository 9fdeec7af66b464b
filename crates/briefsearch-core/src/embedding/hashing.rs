//! Deterministic feature-hashing embedder.
//!
//! Projects word unigrams and character trigrams into a fixed number of
//! buckets with FNV-1a, using a hash bit as the sign so unrelated texts land
//! near zero similarity instead of accumulating positive collisions.
//! Trigrams give morphological variants ("diabetes", "diabetic") overlapping
//! vectors without a stemmer.
//!
//! No model files are needed, which makes this the default embedder for tests,
//! the CLI, and air-gapped deployments.

use super::Embedder;
use crate::error::EmbeddingError;
use std::collections::HashMap;

const MODEL_ID: &str = "hashing-trigram-v1";

/// Weight of a character trigram relative to a whole word.
const TRIGRAM_WEIGHT: f32 = 0.5;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "to", "was", "were", "with",
];

/// Feature-hashing embedder over words and character trigrams.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// FNV-1a 64-bit.
    fn hash(feature: &str) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in feature.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    /// Lowercase alphanumeric words of two or more characters, stop words removed.
    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() >= 2)
            .map(|s| s.to_lowercase())
            .filter(|s| !STOP_WORDS.contains(&s.as_str()))
            .collect()
    }

    fn features(text: &str) -> HashMap<String, f32> {
        let mut features: HashMap<String, f32> = HashMap::new();
        for word in Self::tokenize(text) {
            // IDF approximation: longer terms are rarer.
            let weight = 1.0 + (word.chars().count() as f32).ln();
            *features.entry(format!("w:{word}")).or_default() += weight;

            let padded: Vec<char> = format!("<{word}>").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                *features.entry(format!("g:{gram}")).or_default() += TRIGRAM_WEIGHT;
            }
        }
        features
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for (feature, weight) in Self::features(text) {
            let h = Self::hash(&feature);
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EMBEDDING_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        MODEL_ID
    }

    fn embedding_dim(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::ModelUnavailable(
                "hashing embedder configured with zero dimensions".to_string(),
            ));
        }
        Ok(self.vectorize(text))
    }
}
