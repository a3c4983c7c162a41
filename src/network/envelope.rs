//! Event envelope carried on the bus.
//!
//! ```json
//! {
//!   "event_id": "...", "event_type": "a2a.request", "version": "1.0",
//!   "timestamp": "...", "data": {...},
//!   "metadata": {"source": "job_finder_agent", "correlation_id": "..."}
//! }
//! ```
//!
//! A2A traffic uses `a2a.request`, `a2a.response` and `a2a.error`; ingestion
//! events use `<entity>.<op>` (e.g. `job.created`). Application
//! recommendations produced by job matching go out as
//! `application.recommended`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::transport::TransportError;
use crate::a2a::{AgentId, AgentMessage, MalformedMessage, MessageType, RequestKind};
use crate::types::EntityKind;

/// Envelope format version.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Event type of an application recommendation.
pub const APPLICATION_RECOMMENDED: &str = "application.recommended";

/// Envelope metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Bus envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: Uuid,
    pub event_type: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default)]
    pub metadata: EnvelopeMetadata,
}

fn default_version() -> String {
    ENVELOPE_VERSION.to_string()
}

/// Ingestion operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOp {
    Created,
    Updated,
    Deleted,
}

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    A2a(MessageType),
    Ingest { entity: EntityKind, op: IngestOp },
    /// Application recommendation record
    Application,
}

/// A2A payload inside `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct A2aData {
    from_agent: AgentId,
    to_agent: AgentId,
    request_type: RequestKind,
    #[serde(default)]
    payload: JsonValue,
}

impl Envelope {
    /// Wrap an A2A message.
    pub fn from_message(msg: &AgentMessage) -> Self {
        let data = serde_json::json!({
            "from_agent": msg.from_agent,
            "to_agent": msg.to_agent,
            "request_type": msg.request_type,
            "payload": msg.payload,
        });
        Self {
            event_id: Uuid::new_v4(),
            event_type: format!("a2a.{}", msg.message_type.as_str()),
            version: default_version(),
            timestamp: msg.timestamp,
            data,
            metadata: EnvelopeMetadata {
                source: msg.from_agent.to_string(),
                correlation_id: Some(msg.correlation_id.to_string()),
            },
        }
    }

    /// Ingestion event for a record.
    pub fn ingest(entity: EntityKind, op: IngestOp, source: &str, record: JsonValue) -> Self {
        let op = match op {
            IngestOp::Created => "created",
            IngestOp::Updated => "updated",
            IngestOp::Deleted => "deleted",
        };
        Self {
            event_id: Uuid::new_v4(),
            event_type: format!("{}.{}", entity.as_str(), op),
            version: default_version(),
            timestamp: Utc::now(),
            data: record,
            metadata: EnvelopeMetadata {
                source: source.to_string(),
                correlation_id: None,
            },
        }
    }

    /// Application recommendation record published by `source`.
    pub fn application(source: &AgentId, record: JsonValue) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: APPLICATION_RECOMMENDED.to_string(),
            version: default_version(),
            timestamp: Utc::now(),
            data: record,
            metadata: EnvelopeMetadata {
                source: source.to_string(),
                correlation_id: None,
            },
        }
    }

    /// Classify the event type.
    pub fn kind(&self) -> Result<EventKind, MalformedMessage> {
        let unknown = || MalformedMessage::UnknownEventType(self.event_type.clone());
        if self.event_type == APPLICATION_RECOMMENDED {
            return Ok(EventKind::Application);
        }
        let (prefix, suffix) = self.event_type.split_once('.').ok_or_else(unknown)?;

        if prefix == "a2a" {
            let message_type = match suffix {
                "request" => MessageType::Request,
                "response" => MessageType::Response,
                "error" => MessageType::Error,
                _ => return Err(unknown()),
            };
            return Ok(EventKind::A2a(message_type));
        }

        let entity = match prefix {
            "job" => EntityKind::Job,
            "candidate" => EntityKind::Candidate,
            _ => return Err(unknown()),
        };
        let op = match suffix {
            "created" => IngestOp::Created,
            "updated" => IngestOp::Updated,
            "deleted" => IngestOp::Deleted,
            _ => return Err(unknown()),
        };
        Ok(EventKind::Ingest { entity, op })
    }

    /// Extract the A2A message carried by this envelope.
    pub fn into_message(self) -> Result<AgentMessage, MalformedMessage> {
        let message_type = match self.kind()? {
            EventKind::A2a(t) => t,
            EventKind::Ingest { .. } | EventKind::Application => {
                return Err(MalformedMessage::UnknownEventType(self.event_type))
            }
        };

        let raw_id = self
            .metadata
            .correlation_id
            .as_deref()
            .ok_or(MalformedMessage::MissingCorrelationId)?;
        let correlation_id = Uuid::parse_str(raw_id)
            .map_err(|_| MalformedMessage::InvalidCorrelationId(raw_id.to_string()))?;

        let data: A2aData = serde_json::from_value(self.data)
            .map_err(|e| MalformedMessage::InvalidData(e.to_string()))?;

        Ok(AgentMessage {
            correlation_id,
            from_agent: data.from_agent,
            to_agent: data.to_agent,
            message_type,
            request_type: data.request_type,
            payload: data.payload,
            timestamp: self.timestamp,
        })
    }

    /// Serialise to a wire frame.
    pub fn encode(&self) -> Result<Bytes, TransportError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| TransportError::Encode(e.to_string()))
    }

    /// Parse a wire frame, reporting invalid JSON or missing fields.
    pub fn decode(frame: &[u8]) -> Result<Self, MalformedMessage> {
        serde_json::from_slice(frame).map_err(|e| MalformedMessage::InvalidJson(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a2a_envelope_shape() {
        let msg = AgentMessage::request(
            "job_finder_agent".into(),
            "candidate_finder_agent".into(),
            RequestKind::ValidateMatch,
            serde_json::json!({"job_ids": ["job:1"]}),
        );
        let env = Envelope::from_message(&msg);
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(json["event_type"], "a2a.request");
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["data"]["request_type"], "validate_match");
        assert_eq!(json["metadata"]["source"], "job_finder_agent");
        assert_eq!(
            json["metadata"]["correlation_id"],
            msg.correlation_id.to_string()
        );

        let decoded = Envelope::decode(&env.encode().unwrap())
            .unwrap()
            .into_message()
            .unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_missing_correlation_id_rejected() {
        let msg = AgentMessage::request("a".into(), "b".into(), RequestKind::Status, JsonValue::Null);
        let mut env = Envelope::from_message(&msg);
        env.metadata.correlation_id = None;
        assert_eq!(env.into_message(), Err(MalformedMessage::MissingCorrelationId));
    }

    #[test]
    fn test_bad_frames_rejected() {
        assert!(matches!(
            Envelope::decode(b"{not json"),
            Err(MalformedMessage::InvalidJson(_))
        ));

        let msg = AgentMessage::request("a".into(), "b".into(), RequestKind::Status, JsonValue::Null);
        let mut env = Envelope::from_message(&msg);
        env.event_type = "a2a.shout".into();
        assert!(matches!(env.kind(), Err(MalformedMessage::UnknownEventType(_))));

        let mut env = Envelope::from_message(&msg);
        env.data = serde_json::json!({"from_agent": "a"});
        assert!(matches!(env.into_message(), Err(MalformedMessage::InvalidData(_))));
    }

    #[test]
    fn test_ingest_kind() {
        let env = Envelope::ingest(
            EntityKind::Candidate,
            IngestOp::Deleted,
            "backend",
            serde_json::json!({"id": "42"}),
        );
        assert_eq!(env.event_type, "candidate.deleted");
        assert_eq!(
            env.kind().unwrap(),
            EventKind::Ingest {
                entity: EntityKind::Candidate,
                op: IngestOp::Deleted
            }
        );
    }

    #[test]
    fn test_application_kind() {
        let env = Envelope::application(
            &AgentId::new("job_finder_agent"),
            serde_json::json!({"job_id": "job:1"}),
        );
        assert_eq!(env.event_type, "application.recommended");
        assert_eq!(env.kind().unwrap(), EventKind::Application);
        assert!(matches!(env.into_message(), Err(MalformedMessage::UnknownEventType(_))));
    }
}
