//! In-process message bus.
//!
//! Used when agents are colocated in one process and in tests. Supports
//! fault injection: failed publishes, black-holed agents and duplicate
//! delivery.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

use super::transport::{Inbound, Transport, TransportError};
use crate::a2a::AgentId;

const DEFAULT_BUFFER: usize = 1024;

/// In-process bus routing frames to per-agent channels.
pub struct InMemoryBus {
    routes: RwLock<HashMap<AgentId, mpsc::Sender<Bytes>>>,
    buffer: usize,
    fail_publishes: AtomicU32,
    black_holes: RwLock<HashSet<AgentId>>,
    duplicate_delivery: AtomicBool,
    published: AtomicU64,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl InMemoryBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            fail_publishes: AtomicU32::new(0),
            black_holes: RwLock::new(HashSet::new()),
            duplicate_delivery: AtomicBool::new(false),
            published: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` publishes with `TransportError::Unavailable`.
    pub fn fail_next_publishes(&self, n: u32) {
        self.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Accept but never deliver frames addressed to `agent`.
    pub fn black_hole(&self, agent: &AgentId) {
        self.black_holes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent.clone());
    }

    /// Deliver every frame twice (at-least-once redelivery).
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate_delivery.store(enabled, Ordering::SeqCst);
    }

    /// Frames accepted by `publish` so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self, agent: &AgentId) -> bool {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent)
            .is_some_and(|tx| !tx.is_closed())
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for InMemoryBus {
    async fn publish(&self, to: &AgentId, frame: Bytes) -> Result<(), TransportError> {
        if self.take_injected_failure() {
            return Err(TransportError::Unavailable("injected failure".to_string()));
        }
        self.published.fetch_add(1, Ordering::SeqCst);

        if self
            .black_holes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(to)
        {
            return Ok(());
        }

        // Clone the sender so no lock is held across the send.
        let sender = self
            .routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(to)
            .cloned();
        let Some(sender) = sender else {
            tracing::trace!(agent = %to, "No subscriber, frame dropped");
            return Ok(());
        };

        let copies = if self.duplicate_delivery.load(Ordering::SeqCst) {
            2
        } else {
            1
        };
        for _ in 0..copies {
            if sender.send(frame.clone()).await.is_err() {
                tracing::trace!(agent = %to, "Subscriber gone, frame dropped");
                break;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, agent: &AgentId) -> Result<Inbound, TransportError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent.clone(), tx);
        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
