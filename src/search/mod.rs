//! Semantic search for jobs and candidates.
//!
//! Provides vector-based similarity search using:
//! - An [`Embedder`] turning profile text into vectors (feature hashing by
//!   default, FastEmbed with the `fastembed` feature)
//! - A [`SimilarityIndex`] storing entity vectors (in memory, or Qdrant with
//!   the `qdrant` feature)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌────────────────┐
//! │ Job / Candidate │────▶│ CachedEmbedder │
//! │   (text data)   │     │   (moka)       │
//! └─────────────────┘     └───────┬────────┘
//!                                 │
//!                                 ▼
//!                         ┌──────────────┐
//!                         │   Embedding  │
//!                         │  [f32; 384]  │
//!                         └──────┬───────┘
//!                                │
//!                                ▼
//!                      ┌──────────────────┐
//!                      │  TimeBoundIndex  │
//!                      │ (memory/qdrant)  │
//!                      └────────┬─────────┘
//!                               │
//!                               ▼
//!                        ┌──────────────┐
//!                        │  SearchHits  │
//!                        └──────────────┘
//! ```

mod cache;
mod embedding;
mod index;
#[cfg(feature = "qdrant")]
mod qdrant;

pub use cache::CachedEmbedder;
#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedder;
pub use embedding::{
    check_input, cosine_similarity, Embedder, EmbeddingError, HashingEmbedder, DEFAULT_MAX_CHARS,
    HASHING_MODEL,
};
pub use index::{
    IndexEntry, IndexError, InMemoryIndex, MetadataFilter, SearchHit, SimilarityIndex,
    TimeBoundIndex,
};
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantIndex;

/// Default embedding model (all-MiniLM-L6-v2 - 384 dimensions, good balance of speed/quality)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for the default model
pub const EMBEDDING_DIM: usize = 384;
