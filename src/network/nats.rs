//! NATS-backed transport.
//!
//! Each agent listens on `<prefix>.agents.<agent_id>`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::transport::{Inbound, Transport, TransportError};
use crate::a2a::AgentId;

pub struct NatsTransport {
    client: async_nats::Client,
    subject_prefix: String,
    buffer: usize,
}

impl NatsTransport {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>, buffer: usize) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.into(),
            buffer: buffer.max(1),
        }
    }

    /// Connect to a NATS server.
    pub async fn connect(
        url: &str,
        subject_prefix: impl Into<String>,
        buffer: usize,
    ) -> Result<Self, TransportError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        tracing::info!(url = %url, "Connected to NATS");
        Ok(Self::new(client, subject_prefix, buffer))
    }

    /// Subject carrying `agent`'s inbox
    pub fn subject_for(&self, agent: &AgentId) -> String {
        subject_for(&self.subject_prefix, agent)
    }
}

fn subject_for(prefix: &str, agent: &AgentId) -> String {
    format!("{}.agents.{}", prefix, agent)
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, to: &AgentId, frame: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(self.subject_for(to), frame)
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))
    }

    async fn subscribe(&self, agent: &AgentId) -> Result<Inbound, TransportError> {
        let subject = self.subject_for(agent);
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if tx.send(message.payload).await.is_err() {
                    break;
                }
            }
            tracing::debug!(subject = %subject, "NATS subscription ended");
        });

        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_layout() {
        assert_eq!(
            subject_for("jobmesh", &AgentId::new("job_finder_agent")),
            "jobmesh.agents.job_finder_agent"
        );
    }
}
