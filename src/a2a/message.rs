//! Agent-to-agent message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// Bus address of an agent (e.g. `job_finder_agent`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Direction of an A2A message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Error => "error",
        }
    }
}

/// Operation a request asks the receiving agent to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Run the matching workflow for a `MatchRequest` payload
    FindMatches,
    /// Cross-validate a set of recommendations
    ValidateMatch,
    /// Liveness and handler statistics
    Status,
    /// One-way notice that a run produced matches; never answered
    MatchFound,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::FindMatches => "find_matches",
            RequestKind::ValidateMatch => "validate_match",
            RequestKind::Status => "status",
            RequestKind::MatchFound => "match_found",
        }
    }

    /// Whether the receiver publishes a response (or error) for this kind.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, RequestKind::MatchFound)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One A2A message as seen by the coordinator.
///
/// `correlation_id` identifies one logical request/response pair: replies
/// carry the id of the request they answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub correlation_id: Uuid,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub message_type: MessageType,
    pub request_type: RequestKind,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// New request with a fresh correlation id.
    pub fn request(
        from_agent: AgentId,
        to_agent: AgentId,
        request_type: RequestKind,
        payload: JsonValue,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            from_agent,
            to_agent,
            message_type: MessageType::Request,
            request_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Successful reply to this request.
    pub fn response_to(&self, payload: JsonValue) -> Self {
        self.reply(MessageType::Response, payload)
    }

    /// Error reply to this request.
    pub fn error_to(&self, reason: impl Into<String>) -> Self {
        self.reply(
            MessageType::Error,
            serde_json::json!({ "error": reason.into() }),
        )
    }

    fn reply(&self, message_type: MessageType, payload: JsonValue) -> Self {
        Self {
            correlation_id: self.correlation_id,
            from_agent: self.to_agent.clone(),
            to_agent: self.from_agent.clone(),
            message_type,
            request_type: self.request_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Reason carried by an `Error` message.
    pub fn error_reason(&self) -> String {
        self.payload
            .get("error")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_swaps_agents_and_keeps_id() {
        let req = AgentMessage::request(
            "job_finder_agent".into(),
            "candidate_finder_agent".into(),
            RequestKind::ValidateMatch,
            serde_json::json!({"k": 1}),
        );
        let resp = req.response_to(serde_json::json!({"ok": true}));

        assert_eq!(resp.correlation_id, req.correlation_id);
        assert_eq!(resp.from_agent, req.to_agent);
        assert_eq!(resp.to_agent, req.from_agent);
        assert_eq!(resp.message_type, MessageType::Response);
        assert_eq!(resp.request_type, RequestKind::ValidateMatch);
    }

    #[test]
    fn test_error_reason() {
        let req = AgentMessage::request(
            "a".into(),
            "b".into(),
            RequestKind::Status,
            JsonValue::Null,
        );
        let err = req.error_to("no handler");
        assert_eq!(err.message_type, MessageType::Error);
        assert_eq!(err.error_reason(), "no handler");
    }

    #[test]
    fn test_request_kind_wire_names() {
        let json = serde_json::to_string(&RequestKind::FindMatches).unwrap();
        assert_eq!(json, "\"find_matches\"");
        let kind: RequestKind = serde_json::from_str("\"validate_match\"").unwrap();
        assert_eq!(kind, RequestKind::ValidateMatch);
        let kind: RequestKind = serde_json::from_str("\"match_found\"").unwrap();
        assert!(!kind.expects_reply());
        assert!(RequestKind::Status.expects_reply());
    }
}
