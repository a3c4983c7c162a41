//! Pending request table.
//!
//! One mutex around a `HashMap`; the lock is never held across an await.
//! Whoever removes an entry owns its resolution, so each waiter is resolved
//! at most once.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::A2aError;
use super::message::{AgentId, AgentMessage, RequestKind};

/// Result delivered to a waiting `send_request`.
pub type RequestOutcome = Result<AgentMessage, A2aError>;

/// An outstanding request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    pub correlation_id: Uuid,
    pub to_agent: AgentId,
    pub request_type: RequestKind,
    pub created_at: Instant,
    pub deadline: Instant,
    pub retries_used: u32,
    result_tx: oneshot::Sender<RequestOutcome>,
}

impl PendingRequest {
    /// Resolve the waiter. Returns false if it already went away.
    pub fn resolve(self, outcome: RequestOutcome) -> bool {
        self.result_tx.send(outcome).is_ok()
    }

    /// Timeout error for this request.
    pub fn timeout_error(&self) -> A2aError {
        A2aError::Timeout {
            correlation_id: self.correlation_id,
            to_agent: self.to_agent.clone(),
            timeout_ms: self
                .deadline
                .saturating_duration_since(self.created_at)
                .as_millis() as u64,
        }
    }
}

/// Table of outstanding requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<Uuid, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiver its outcome is sent on.
    pub fn register(
        &self,
        correlation_id: Uuid,
        to_agent: AgentId,
        request_type: RequestKind,
        deadline: Instant,
    ) -> oneshot::Receiver<RequestOutcome> {
        let (result_tx, result_rx) = oneshot::channel();
        let entry = PendingRequest {
            correlation_id,
            to_agent,
            request_type,
            created_at: Instant::now(),
            deadline,
            retries_used: 0,
            result_tx,
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(correlation_id, entry);
        result_rx
    }

    /// Remove an entry, transferring ownership of its resolution to the caller.
    pub fn remove(&self, correlation_id: &Uuid) -> Option<PendingRequest> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(correlation_id)
    }

    /// Whether the request is still awaiting resolution.
    pub fn contains(&self, correlation_id: &Uuid) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count one publish retry against the entry.
    pub fn record_retry(&self, correlation_id: &Uuid) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(correlation_id)
        {
            entry.retries_used = entry.retries_used.saturating_add(1);
        }
    }

    /// Publish retries recorded so far for a pending request.
    pub fn retries_used(&self, correlation_id: &Uuid) -> Option<u32> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(correlation_id)
            .map(|e| e.retries_used)
    }

    /// Remove every entry whose deadline is at or before `now`.
    pub fn drain_expired(&self, now: Instant) -> Vec<PendingRequest> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<Uuid> = entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }

    /// Remove every entry.
    pub fn drain_all(&self) -> Vec<PendingRequest> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, e)| e)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn register(table: &PendingTable, deadline: Instant) -> (Uuid, oneshot::Receiver<RequestOutcome>) {
        let id = Uuid::new_v4();
        let rx = table.register(id, "peer".into(), RequestKind::Status, deadline);
        (id, rx)
    }

    #[tokio::test]
    async fn test_remove_transfers_ownership_once() {
        let table = PendingTable::new();
        let (id, rx) = register(&table, Instant::now() + Duration::from_secs(5));

        let entry = table.remove(&id).unwrap();
        assert!(table.remove(&id).is_none());
        assert!(table.is_empty());

        let msg = AgentMessage::request("a".into(), "b".into(), RequestKind::Status, serde_json::Value::Null);
        assert!(entry.resolve(Ok(msg)));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_drain_expired_only_takes_expired() {
        let table = PendingTable::new();
        let now = Instant::now();
        let (old, _rx1) = register(&table, now);
        let (fresh, _rx2) = register(&table, now + Duration::from_secs(60));

        let expired = table.drain_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id, old);
        assert!(table.contains(&fresh));
        assert!(!table.contains(&old));
    }

    #[test]
    fn test_record_retry() {
        let table = PendingTable::new();
        let (id, _rx) = register(&table, Instant::now() + Duration::from_secs(5));
        table.record_retry(&id);
        table.record_retry(&id);
        assert_eq!(table.retries_used(&id), Some(2));
        assert_eq!(table.retries_used(&Uuid::new_v4()), None);
    }

    #[test]
    fn test_resolve_after_receiver_dropped() {
        let table = PendingTable::new();
        let (id, rx) = register(&table, Instant::now());
        drop(rx);
        let entry = table.remove(&id).unwrap();
        let err = entry.timeout_error();
        assert!(!entry.resolve(Err(err)));
    }
}
