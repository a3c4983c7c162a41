//! Qdrant-backed similarity index (`qdrant` feature).
//!
//! Point ids are UUID v5 of the entity id; the entity id itself and the
//! record metadata live in the point payload. Qdrant has no notion of
//! insertion order, so equal scores are ordered by entity id.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder,
    Distance, Filter, GetPointsBuilder, PointStruct, PointsIdsList, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use uuid::Uuid;

use super::index::{IndexEntry, IndexError, MetadataFilter, SearchHit, SimilarityIndex};

const ENTITY_ID_KEY: &str = "entity_id";

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Connect and create `<prefix>_<collection>` if missing.
    pub async fn connect(
        url: &str,
        prefix: &str,
        collection: &str,
        dimension: usize,
    ) -> Result<Self, IndexError> {
        let client = Qdrant::from_url(url).build().map_err(unavailable)?;
        let collection = format!("{}_{}", prefix, collection);

        if !client
            .collection_exists(collection.as_str())
            .await
            .map_err(unavailable)?
        {
            client
                .create_collection(
                    CreateCollectionBuilder::new(collection.as_str()).vectors_config(
                        VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(unavailable)?;
            tracing::info!(collection = %collection, dimension, "Created Qdrant collection");
        }

        Ok(Self {
            client,
            collection,
            dimension,
        })
    }

    /// Name of the backing collection
    pub fn collection(&self) -> &str {
        &self.collection
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

fn unavailable(err: impl std::fmt::Display) -> IndexError {
    IndexError::Unavailable(err.to_string())
}

fn point_id(entity_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, entity_id.as_bytes()).to_string()
}

fn to_filter(filter: &MetadataFilter) -> Result<Filter, IndexError> {
    let mut conditions = Vec::with_capacity(filter.must.len());
    for (key, value) in &filter.must {
        let condition = match value {
            JsonValue::String(s) => Condition::matches(key.as_str(), s.clone()),
            JsonValue::Bool(b) => Condition::matches(key.as_str(), *b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Condition::matches(key.as_str(), i),
                None => {
                    return Err(IndexError::Backend(format!(
                        "non-integer filter on '{}' not supported",
                        key
                    )))
                }
            },
            other => {
                return Err(IndexError::Backend(format!(
                    "unsupported filter value for '{}': {}",
                    key, other
                )))
            }
        };
        conditions.push(condition);
    }
    Ok(Filter::must(conditions))
}

fn to_json(value: QdrantValue) -> JsonValue {
    match value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::IntegerValue(i)) => JsonValue::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::ListValue(list)) => {
            JsonValue::Array(list.values.into_iter().map(to_json).collect())
        }
        Some(Kind::StructValue(s)) => JsonValue::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, to_json(v)))
                .collect(),
        ),
    }
}

/// Split a payload into (entity id, metadata).
fn from_payload(payload: HashMap<String, QdrantValue>) -> Option<(String, Map<String, JsonValue>)> {
    let mut metadata: Map<String, JsonValue> =
        payload.into_iter().map(|(k, v)| (k, to_json(v))).collect();
    match metadata.remove(ENTITY_ID_KEY) {
        Some(JsonValue::String(entity_id)) => Some((entity_id, metadata)),
        _ => None,
    }
}

#[async_trait]
impl SimilarityIndex for QdrantIndex {
    async fn upsert(&self, entry: IndexEntry) -> Result<(), IndexError> {
        self.check_dimension(entry.vector.len())?;

        let mut body = entry.metadata;
        body.insert(
            ENTITY_ID_KEY.to_string(),
            JsonValue::String(entry.entity_id.clone()),
        );
        let payload = Payload::try_from(JsonValue::Object(body))
            .map_err(|e| IndexError::InvalidEntry(e.to_string()))?;

        let point = PointStruct::new(point_id(&entry.entity_id), entry.vector, payload);
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.as_str(), vec![point]).wait(true))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn remove(&self, entity_id: &str) -> Result<bool, IndexError> {
        let existed = self.get(entity_id).await?.is_some();
        if existed {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(self.collection.as_str())
                        .points(PointsIdsList {
                            ids: vec![point_id(entity_id).into()],
                        })
                        .wait(true),
                )
                .await
                .map_err(unavailable)?;
        }
        Ok(existed)
    }

    /// Returns the entry with its metadata; vectors are not fetched back.
    async fn get(&self, entity_id: &str) -> Result<Option<IndexEntry>, IndexError> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(self.collection.as_str(), vec![point_id(entity_id).into()])
                    .with_payload(true),
            )
            .await
            .map_err(unavailable)?;

        Ok(response
            .result
            .into_iter()
            .next()
            .and_then(|point| from_payload(point.payload))
            .map(|(entity_id, metadata)| IndexEntry {
                entity_id,
                vector: Vec::new(),
                metadata,
            }))
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

        let mut request =
            SearchPointsBuilder::new(self.collection.as_str(), vector.to_vec(), k as u64)
                .with_payload(true);
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            request = request.filter(to_filter(filter)?);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(unavailable)?;

        let mut hits: Vec<SearchHit> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let score = point.score;
                from_payload(point.payload).map(|(entity_id, metadata)| SearchHit {
                    entity_id,
                    similarity: score.clamp(-1.0, 1.0),
                    metadata,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        Ok(hits)
    }

    async fn len(&self) -> Result<usize, IndexError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.as_str()).exact(true))
            .await
            .map_err(unavailable)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}
