//! Transport abstraction for the agent message bus.
//!
//! Agents are addressed by `AgentId`; each agent subscribes to its own
//! inbox and receives raw envelope frames. Delivery is at-least-once and
//! unordered, so consumers must tolerate duplicates.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::a2a::AgentId;

/// Receiving half of an agent inbox.
pub type Inbound = mpsc::Receiver<Bytes>;

/// Bus failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Bus temporarily unreachable; safe to retry
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Transport has been shut down
    #[error("transport closed")]
    Closed,

    /// Frame could not be encoded
    #[error("encode error: {0}")]
    Encode(String),
}

impl TransportError {
    /// Whether retrying the same publish may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

/// Message bus used by the coordinator and ingestion.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a frame to an agent's inbox.
    ///
    /// Frames for agents nobody listens to are silently dropped, as on a
    /// real broker.
    async fn publish(&self, to: &AgentId, frame: Bytes) -> Result<(), TransportError>;

    /// Subscribe to an agent's inbox.
    async fn subscribe(&self, agent: &AgentId) -> Result<Inbound, TransportError>;

    /// Short name for logs ("memory", "nats").
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(TransportError::Unavailable("down".into()).is_transient());
        assert!(!TransportError::Closed.is_transient());
        assert!(!TransportError::Encode("bad".into()).is_transient());
    }
}
