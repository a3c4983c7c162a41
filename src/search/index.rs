//! Similarity index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use super::embedding::cosine_similarity;

/// Index failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    /// Backend did not answer in time or is unreachable
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("index backend error: {0}")]
    Backend(String),
}

/// A stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub entity_id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
}

impl IndexEntry {
    pub fn new(entity_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            entity_id: entity_id.into(),
            vector,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_id: String,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
    pub metadata: Map<String, JsonValue>,
}

/// Conjunction of metadata equality conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub must: Vec<(String, JsonValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.must.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, metadata: &Map<String, JsonValue>) -> bool {
        self.must
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Vector store queried by cosine similarity.
///
/// Queries return hits by similarity descending, ties by first insertion of
/// the entity id.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn upsert(&self, entry: IndexEntry) -> Result<(), IndexError>;

    /// Returns whether the entity was present.
    async fn remove(&self, entity_id: &str) -> Result<bool, IndexError>;

    async fn get(&self, entity_id: &str) -> Result<Option<IndexEntry>, IndexError>;

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, IndexError>;

    async fn len(&self) -> Result<usize, IndexError>;
}

struct Slot {
    seq: u64,
    entry: IndexEntry,
}

#[derive(Default)]
struct Slots {
    by_id: HashMap<String, Slot>,
    next_seq: u64,
}

/// In-memory brute-force index.
///
/// Reads share the lock; upserts take it exclusively, so writes are
/// serialized.
pub struct InMemoryIndex {
    dimension: usize,
    slots: RwLock<Slots>,
}

impl InMemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            slots: RwLock::new(Slots::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, actual: usize) -> Result<(), IndexError> {
        if actual != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    async fn upsert(&self, entry: IndexEntry) -> Result<(), IndexError> {
        if entry.entity_id.is_empty() {
            return Err(IndexError::InvalidEntry("empty entity id".to_string()));
        }
        self.check_dimension(entry.vector.len())?;
        if entry.vector.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::InvalidEntry(format!(
                "non-finite vector for {}",
                entry.entity_id
            )));
        }

        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        match slots.by_id.get_mut(&entry.entity_id) {
            // Replacing keeps the original insertion order.
            Some(slot) => slot.entry = entry,
            None => {
                let seq = slots.next_seq;
                slots.next_seq += 1;
                slots.by_id.insert(entry.entity_id.clone(), Slot { seq, entry });
            }
        }
        Ok(())
    }

    async fn remove(&self, entity_id: &str) -> Result<bool, IndexError> {
        Ok(self
            .slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .remove(entity_id)
            .is_some())
    }

    async fn get(&self, entity_id: &str) -> Result<Option<IndexEntry>, IndexError> {
        Ok(self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .get(entity_id)
            .map(|slot| slot.entry.clone()))
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.check_dimension(vector.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(f32, u64, &IndexEntry)> = slots
            .by_id
            .values()
            .filter(|slot| filter.map_or(true, |f| f.matches(&slot.entry.metadata)))
            .map(|slot| (cosine_similarity(vector, &slot.entry.vector), slot.seq, &slot.entry))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(similarity, _, entry)| SearchHit {
                entity_id: entry.entity_id.clone(),
                similarity,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .len())
    }
}

/// Bounds `query` by a time budget; overruns become `Unavailable`.
pub struct TimeBoundIndex {
    inner: Arc<dyn SimilarityIndex>,
    budget: Duration,
}

impl TimeBoundIndex {
    pub fn new(inner: Arc<dyn SimilarityIndex>, budget: Duration) -> Self {
        Self { inner, budget }
    }

    /// Time allowed for a single query
    pub fn budget(&self) -> Duration {
        self.budget
    }
}

#[async_trait]
impl SimilarityIndex for TimeBoundIndex {
    async fn upsert(&self, entry: IndexEntry) -> Result<(), IndexError> {
        self.inner.upsert(entry).await
    }

    async fn remove(&self, entity_id: &str) -> Result<bool, IndexError> {
        self.inner.remove(entity_id).await
    }

    async fn get(&self, entity_id: &str) -> Result<Option<IndexEntry>, IndexError> {
        self.inner.get(entity_id).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        match tokio::time::timeout(self.budget, self.inner.query(vector, k, filter)).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::Unavailable(format!(
                "query exceeded {}ms budget",
                self.budget.as_millis()
            ))),
        }
    }

    async fn len(&self) -> Result<usize, IndexError> {
        self.inner.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry::new(id, vector)
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let index = InMemoryIndex::new(2);
        index.upsert(entry("far", vec![0.0, 1.0])).await.unwrap();
        index.upsert(entry("near", vec![1.0, 0.1])).await.unwrap();
        index.upsert(entry("exact", vec![1.0, 0.0])).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near", "far"]);
        assert!(hits.iter().all(|h| (-1.0..=1.0).contains(&h.similarity)));
    }

    #[tokio::test]
    async fn test_ties_keep_first_insertion_order() {
        let index = InMemoryIndex::new(2);
        index.upsert(entry("b", vec![1.0, 0.0])).await.unwrap();
        index.upsert(entry("a", vec![1.0, 0.0])).await.unwrap();
        // Re-upserting "b" does not move it behind "a".
        index.upsert(entry("b", vec![2.0, 0.0])).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].entity_id, "b");
        assert_eq!(hits[1].entity_id, "a");
        assert_eq!(index.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_filter_and_k() {
        let index = InMemoryIndex::new(2);
        index
            .upsert(entry("job:1", vec![1.0, 0.0]).with_metadata("kind", "job"))
            .await
            .unwrap();
        index
            .upsert(entry("candidate:1", vec![1.0, 0.0]).with_metadata("kind", "candidate"))
            .await
            .unwrap();
        index
            .upsert(entry("job:2", vec![0.5, 0.5]).with_metadata("kind", "job"))
            .await
            .unwrap();

        let filter = MetadataFilter::new().eq("kind", "job");
        let hits = index.query(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.entity_id.starts_with("job:")));

        let hits = index.query(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.query(&[1.0, 0.0], 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_vectors() {
        let index = InMemoryIndex::new(3);
        assert_eq!(
            index.upsert(entry("x", vec![1.0])).await,
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        );
        assert!(matches!(
            index.upsert(entry("x", vec![f32::NAN, 0.0, 0.0])).await,
            Err(IndexError::InvalidEntry(_))
        ));
        assert!(index.query(&[1.0, 0.0], 5, None).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_and_get() {
        let index = InMemoryIndex::new(2);
        index.upsert(entry("job:1", vec![1.0, 0.0])).await.unwrap();
        assert!(index.get("job:1").await.unwrap().is_some());
        assert!(index.remove("job:1").await.unwrap());
        assert!(!index.remove("job:1").await.unwrap());
        assert!(index.get("job:1").await.unwrap().is_none());
    }

    struct SlowIndex;

    #[async_trait]
    impl SimilarityIndex for SlowIndex {
        async fn upsert(&self, _entry: IndexEntry) -> Result<(), IndexError> {
            Ok(())
        }

        async fn remove(&self, _entity_id: &str) -> Result<bool, IndexError> {
            Ok(false)
        }

        async fn get(&self, _entity_id: &str) -> Result<Option<IndexEntry>, IndexError> {
            Ok(None)
        }

        async fn query(
            &self,
            _vector: &[f32],
            _k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<SearchHit>, IndexError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        async fn len(&self) -> Result<usize, IndexError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_time_bound_query() {
        let index = TimeBoundIndex::new(Arc::new(SlowIndex), Duration::from_millis(50));
        let err = index.query(&[1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(_)));
    }
}
