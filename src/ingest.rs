//! Ingestion of job and candidate records into the similarity index.
//!
//! Records arrive as `job.*` / `candidate.*` envelopes, either on the bus or
//! through `POST /v1/events`. Created and updated records are embedded and
//! upserted under `<kind>:<id>`; deleted records are removed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::network::{Envelope, EventKind, IngestOp};
use crate::search::{Embedder, IndexEntry, SimilarityIndex};
use crate::types::EntityKind;

/// Fields whose text is embedded, in order.
const TEXT_FIELDS: &[&str] = &[
    "title",
    "name",
    "headline",
    "summary",
    "description",
    "bio",
    "requirements",
    "skills",
    "location",
    "experience_level",
];

/// Effect of one ingestion event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "entity_id", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed(String),
    Removed(String),
    /// Delete for an entity the index did not hold
    NotFound(String),
}

/// Embeds records and writes them to the index.
#[derive(Clone)]
pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn SimilarityIndex>) -> Self {
        Self { embedder, index }
    }

    /// Index the events are applied to
    pub fn index(&self) -> &Arc<dyn SimilarityIndex> {
        &self.index
    }

    /// Apply one ingestion event to the index.
    pub async fn apply(&self, envelope: Envelope) -> Result<IngestOutcome> {
        let (entity, op) = match envelope.kind()? {
            EventKind::Ingest { entity, op } => (entity, op),
            EventKind::A2a(_) | EventKind::Application => {
                return Err(Error::Ingest(format!(
                    "{} is not an ingestion event",
                    envelope.event_type
                )))
            }
        };
        let record = match envelope.data {
            JsonValue::Object(record) => record,
            other => {
                return Err(Error::Ingest(format!(
                    "record must be an object, got {}",
                    json_type(&other)
                )))
            }
        };
        let entity_id = entity.entity_id(&record_id(&record)?);

        let outcome = match op {
            IngestOp::Deleted => {
                if self.index.remove(&entity_id).await? {
                    IngestOutcome::Removed(entity_id)
                } else {
                    IngestOutcome::NotFound(entity_id)
                }
            }
            IngestOp::Created | IngestOp::Updated => {
                let text = record_text(&record);
                if text.is_empty() {
                    return Err(Error::Ingest(format!("{} has no text to embed", entity_id)));
                }
                let vector = self.embedder.embed(&text).await?;
                self.index
                    .upsert(IndexEntry {
                        entity_id: entity_id.clone(),
                        vector,
                        metadata: entry_metadata(entity, record),
                    })
                    .await?;
                IngestOutcome::Indexed(entity_id)
            }
        };

        metrics::counter!("ingest_events_total", "entity" => entity.as_str()).increment(1);
        match &outcome {
            IngestOutcome::Indexed(id) => info!(entity_id = %id, source = %envelope.metadata.source, "Entity indexed"),
            IngestOutcome::Removed(id) => info!(entity_id = %id, "Entity removed"),
            IngestOutcome::NotFound(id) => debug!(entity_id = %id, "Delete for unknown entity"),
        }
        Ok(outcome)
    }
}

fn record_id(record: &Map<String, JsonValue>) -> Result<String> {
    match record.get("id") {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::Ingest("record has no id".to_string())),
    }
}

/// Text embedded for a record.
pub fn record_text(record: &Map<String, JsonValue>) -> String {
    let mut parts = Vec::new();
    for field in TEXT_FIELDS {
        match record.get(*field) {
            Some(JsonValue::String(s)) if !s.trim().is_empty() => parts.push(s.trim().to_string()),
            Some(JsonValue::Array(items)) => {
                let items: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                if !items.is_empty() {
                    parts.push(items.join(", "));
                }
            }
            _ => {}
        }
    }
    parts.join(". ")
}

fn entry_metadata(entity: EntityKind, mut record: Map<String, JsonValue>) -> Map<String, JsonValue> {
    record.insert("kind".to_string(), JsonValue::from(entity.as_str()));
    // Search filters on remote_friendly; absent means false.
    if entity == EntityKind::Job && !record.contains_key("remote_friendly") {
        record.insert("remote_friendly".to_string(), JsonValue::Bool(false));
    }
    record
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{HashingEmbedder, InMemoryIndex, EMBEDDING_DIM};
    use serde_json::json;

    fn ingestor() -> Ingestor {
        Ingestor::new(
            Arc::new(HashingEmbedder::default()),
            Arc::new(InMemoryIndex::new(EMBEDDING_DIM)),
        )
    }

    #[tokio::test]
    async fn test_created_then_deleted() {
        let ingestor = ingestor();
        let created = Envelope::ingest(
            EntityKind::Job,
            IngestOp::Created,
            "backend",
            json!({"id": 42, "title": "Go developer", "skills": ["go", "kubernetes"]}),
        );
        let outcome = ingestor.apply(created).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Indexed("job:42".into()));

        let stored = ingestor.index().get("job:42").await.unwrap().unwrap();
        assert_eq!(stored.metadata["kind"], "job");
        assert_eq!(stored.metadata["remote_friendly"], false);

        let deleted = Envelope::ingest(EntityKind::Job, IngestOp::Deleted, "backend", json!({"id": "42"}));
        assert_eq!(
            ingestor.apply(deleted.clone()).await.unwrap(),
            IngestOutcome::Removed("job:42".into())
        );
        assert_eq!(
            ingestor.apply(deleted).await.unwrap(),
            IngestOutcome::NotFound("job:42".into())
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_records() {
        let ingestor = ingestor();
        let no_id = Envelope::ingest(EntityKind::Candidate, IngestOp::Created, "x", json!({"name": "Ada"}));
        assert!(matches!(ingestor.apply(no_id).await, Err(Error::Ingest(_))));

        let no_text = Envelope::ingest(EntityKind::Candidate, IngestOp::Created, "x", json!({"id": 1}));
        assert!(matches!(ingestor.apply(no_text).await, Err(Error::Ingest(_))));

        let mut unknown = Envelope::ingest(EntityKind::Job, IngestOp::Created, "x", json!({"id": 1}));
        unknown.event_type = "job.archived".into();
        assert!(matches!(ingestor.apply(unknown).await, Err(Error::Malformed(_))));
    }

    #[test]
    fn test_record_text_order() {
        let record = json!({
            "location": "Berlin",
            "title": "Platform engineer",
            "skills": ["go", "terraform"],
            "salary": 90000
        });
        assert_eq!(
            record_text(record.as_object().unwrap()),
            "Platform engineer. go, terraform. Berlin"
        );
    }
}
