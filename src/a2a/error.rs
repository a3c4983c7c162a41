//! A2A error types.

use thiserror::Error;
use uuid::Uuid;

use super::message::{AgentId, RequestKind};
use crate::network::TransportError;

/// Outcome of a failed `send_request`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum A2aError {
    /// No response arrived before the deadline
    #[error("request {correlation_id} to {to_agent} timed out after {timeout_ms}ms")]
    Timeout {
        correlation_id: Uuid,
        to_agent: AgentId,
        timeout_ms: u64,
    },

    /// Publishing failed on every attempt
    #[error("transport failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Request was cancelled before a response arrived
    #[error("request {0} cancelled")]
    Cancelled(Uuid),

    /// The remote agent answered with an error message
    #[error("{agent} replied with error: {reason}")]
    Remote { agent: AgentId, reason: String },

    /// Payload could not be encoded or decoded
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl A2aError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, A2aError::Timeout { .. })
    }
}

/// Inbound frame that cannot be processed; logged and dropped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MalformedMessage {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("missing correlation id")]
    MissingCorrelationId,

    #[error("invalid correlation id '{0}'")]
    InvalidCorrelationId(String),

    #[error("invalid message data: {0}")]
    InvalidData(String),

    #[error("no agent '{0}' hosted here")]
    UnknownAgent(AgentId),

    #[error("agent '{agent}' does not handle '{kind}'")]
    UnsupportedRequest { agent: AgentId, kind: RequestKind },
}
