//! Text embedding.
//!
//! Embedding is a pure function of `(model_version, text)`. Failures are
//! reported as [`EmbeddingError`]; a zero vector is never substituted.

use async_trait::async_trait;
use thiserror::Error;

use super::EMBEDDING_DIM;

/// Model version of the built-in hashing embedder.
pub const HASHING_MODEL: &str = "hashing-v1";

/// Default maximum input length in characters.
pub const DEFAULT_MAX_CHARS: usize = 8_192;

/// Embedding failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("empty input")]
    EmptyInput,

    #[error("input too long: {len} chars (max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Text to vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model; equal versions give equal vectors.
    fn model_version(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Reject empty and oversized input. Returns the trimmed text.
pub fn check_input(text: &str, max_chars: usize) -> Result<&str, EmbeddingError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(EmbeddingError::TextTooLong {
            len,
            max: max_chars,
        });
    }
    Ok(trimmed)
}

/// Cosine similarity in [-1, 1]; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Feature-hashing bag-of-words embedder.
///
/// Tokens (lowercased, alphanumeric plus `+`, `#`) and adjacent token pairs
/// are hashed with FNV-1a into `dimension` buckets; the count vector is L2
/// normalised. Deterministic and dependency free.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    max_chars: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM, DEFAULT_MAX_CHARS)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize, max_chars: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            max_chars,
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        (fnv1a(feature.as_bytes()) % self.dimension as u64) as usize
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = check_input(text, self.max_chars)?;
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            vector[self.bucket(token)] += 1.0;
        }
        for pair in tokens.windows(2) {
            vector[self.bucket(&format!("{} {}", pair[0], pair[1]))] += 0.5;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Err(EmbeddingError::Failed("degenerate vector".to_string()));
        }
        for x in vector.iter_mut() {
            *x /= norm;
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_version(&self) -> &str {
        HASHING_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_sync(text)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ *b as u64).wrapping_mul(PRIME))
}

#[cfg(feature = "fastembed")]
pub use self::fast::FastEmbedder;

#[cfg(feature = "fastembed")]
mod fast {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Arc;

    /// all-MiniLM-L6-v2 via fastembed (ONNX, runs on the blocking pool).
    pub struct FastEmbedder {
        model: Arc<TextEmbedding>,
        max_chars: usize,
    }

    impl FastEmbedder {
        /// Load the model (downloads it on first use).
        pub fn try_new(max_chars: usize) -> Result<Self, EmbeddingError> {
            let model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::ModelUnavailable(e.to_string()))?;
            tracing::info!(model = crate::search::DEFAULT_MODEL, "Embedding model loaded");
            Ok(Self {
                model: Arc::new(model),
                max_chars,
            })
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn model_version(&self) -> &str {
            crate::search::DEFAULT_MODEL
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let text = check_input(text, self.max_chars)?.to_string();
            let model = Arc::clone(&self.model);
            let mut vectors = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
                .await
                .map_err(|e| EmbeddingError::Failed(e.to_string()))?
                .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
            vectors
                .pop()
                .ok_or_else(|| EmbeddingError::Failed("model returned no vector".to_string()))
        }
    }
}
