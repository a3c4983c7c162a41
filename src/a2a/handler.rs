//! Request handlers.
//!
//! Handlers are a closed set of variants keyed by `(agent, request kind)`.
//! Each registration tracks execution statistics, reported by the built-in
//! `Status` handler.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use super::coordinator::A2aCoordinator;
use super::message::{AgentId, RequestKind};
use crate::types::MatchRequest;
use crate::workflow::{
    CoordinatorPeer, FollowUp, MatchFound, MatchValidator, PeerDelegate, ValidationRequest,
    WorkflowEngine,
};

/// Context passed to a handler invocation.
#[derive(Clone)]
pub struct RequestContext {
    /// Agent the request was addressed to
    pub agent: AgentId,
    /// Agent that sent the request
    pub caller: AgentId,
    pub correlation_id: Uuid,
    pub coordinator: Arc<A2aCoordinator>,
}

/// Handler failure, sent back to the caller as an `Error` message.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Failed(String),
}

/// Request handler variants.
#[derive(Clone)]
pub enum Handler {
    /// Run the matching workflow, optionally cross-validating with `peer`
    FindMatches {
        engine: Arc<WorkflowEngine>,
        peer: Option<AgentId>,
    },
    /// Validate another agent's recommendations
    ValidateMatch(Arc<MatchValidator>),
    /// Report liveness and handler statistics
    Status,
    /// Record a peer's `match_found` notice
    MatchFound,
}

impl Handler {
    /// Run the handler on a decoded payload. The returned value becomes the
    /// response payload unless the request kind is one-way.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        payload: JsonValue,
    ) -> Result<JsonValue, HandlerError> {
        match self {
            Handler::FindMatches { engine, peer } => {
                let request: MatchRequest = serde_json::from_value(payload)
                    .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
                let requester_id = request.requester_id.clone();

                let delegate = peer.as_ref().map(|peer| {
                    CoordinatorPeer::new(
                        ctx.coordinator.clone(),
                        peer.clone(),
                        engine.peer_timeout(),
                    )
                });
                let run = engine
                    .execute(request, delegate.as_ref().map(|d| d as &dyn PeerDelegate))
                    .await;
                FollowUp::new(
                    ctx.coordinator.clone(),
                    engine.config().follow_up.clone(),
                    engine.role(),
                    peer.clone(),
                )
                .spawn(&run, requester_id);

                match run.outcome {
                    Ok(response) => serde_json::to_value(response)
                        .map_err(|e| HandlerError::Failed(e.to_string())),
                    Err(failure) => Err(HandlerError::Failed(failure.to_string())),
                }
            }
            Handler::ValidateMatch(validator) => {
                let request: ValidationRequest = serde_json::from_value(payload)
                    .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
                let report = validator.validate(&request);
                serde_json::to_value(report).map_err(|e| HandlerError::Failed(e.to_string()))
            }
            Handler::MatchFound => {
                let notice: MatchFound = serde_json::from_value(payload)
                    .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
                tracing::info!(
                    agent = %ctx.agent,
                    from = %ctx.caller,
                    run_id = %notice.run_id,
                    requester = %notice.requester_id,
                    matches = notice.entity_ids.len(),
                    "Peer reported matches"
                );
                Ok(serde_json::json!({ "received": notice.entity_ids.len() }))
            }
            Handler::Status => {
                let handlers = ctx.coordinator.registry().stats_for(&ctx.agent);
                Ok(serde_json::json!({
                    "agent": ctx.agent,
                    "status": "ok",
                    "transport": ctx.coordinator.transport_name(),
                    "pending_requests": ctx.coordinator.pending_count(),
                    "handlers": handlers,
                }))
            }
        }
    }
}

/// Handler execution statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerStats {
    pub request_type: RequestKind,
    /// Total number of executions
    pub execution_count: u64,
    /// Average execution duration in milliseconds
    pub average_duration_ms: u64,
    /// Number of failed executions
    pub error_count: u64,
    /// Success rate percentage (0-100)
    pub success_rate: f64,
}

/// A registered handler with usage statistics.
pub struct RegisteredHandler {
    request_type: RequestKind,
    handler: Handler,
    execution_count: AtomicU64,
    total_duration_ms: AtomicU64,
    error_count: AtomicU64,
}

impl RegisteredHandler {
    fn new(request_type: RequestKind, handler: Handler) -> Self {
        Self {
            request_type,
            handler,
            execution_count: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// The registered variant
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Invoke and record duration and outcome.
    pub async fn invoke_tracked(
        &self,
        ctx: &RequestContext,
        payload: JsonValue,
    ) -> Result<JsonValue, HandlerError> {
        let start = Instant::now();
        let result = self.handler.invoke(ctx, payload).await;
        self.record(start.elapsed(), result.is_ok());
        result
    }

    fn record(&self, elapsed: Duration, ok: bool) {
        self.execution_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        if !ok {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of the execution counters
    pub fn stats(&self) -> HandlerStats {
        let execution_count = self.execution_count.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);

        HandlerStats {
            request_type: self.request_type,
            execution_count,
            average_duration_ms: if execution_count > 0 {
                total_duration_ms / execution_count
            } else {
                0
            },
            error_count,
            success_rate: if execution_count > 0 {
                ((execution_count - error_count) as f64 / execution_count as f64) * 100.0
            } else {
                100.0
            },
        }
    }
}

/// Handlers keyed by `(agent, request kind)`. Fixed once the coordinator
/// is built.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(AgentId, RequestKind), Arc<RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same key.
    pub fn register(&mut self, agent: AgentId, kind: RequestKind, handler: Handler) {
        self.handlers
            .insert((agent, kind), Arc::new(RegisteredHandler::new(kind, handler)));
    }

    /// Builder-style registration.
    pub fn with(mut self, agent: impl Into<AgentId>, kind: RequestKind, handler: Handler) -> Self {
        self.register(agent.into(), kind, handler);
        self
    }

    /// Handler for requests of `kind` addressed to `agent`.
    pub fn route(&self, agent: &AgentId, kind: RequestKind) -> Option<Arc<RegisteredHandler>> {
        self.handlers.get(&(agent.clone(), kind)).cloned()
    }

    /// Whether any handler is registered for `agent`.
    pub fn hosts(&self, agent: &AgentId) -> bool {
        self.handlers.keys().any(|(a, _)| a == agent)
    }

    /// Agents with at least one handler, sorted.
    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.handlers.keys().map(|(a, _)| a.clone()).collect();
        agents.sort();
        agents.dedup();
        agents
    }

    /// Statistics for every handler of `agent`, ordered by request kind name.
    pub fn stats_for(&self, agent: &AgentId) -> Vec<HandlerStats> {
        let mut stats: Vec<HandlerStats> = self
            .handlers
            .iter()
            .filter(|((a, _), _)| a == agent)
            .map(|(_, h)| h.stats())
            .collect();
        stats.sort_by_key(|s| s.request_type.as_str());
        stats
    }

    /// Number of registrations across all agents
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_routing() {
        let registry = HandlerRegistry::new()
            .with("a", RequestKind::Status, Handler::Status)
            .with("b", RequestKind::Status, Handler::Status);

        assert!(registry.route(&"a".into(), RequestKind::Status).is_some());
        assert!(registry.route(&"a".into(), RequestKind::FindMatches).is_none());
        assert!(registry.hosts(&"b".into()));
        assert!(!registry.hosts(&"c".into()));
        assert_eq!(registry.agents(), vec![AgentId::new("a"), AgentId::new("b")]);
    }

    #[test]
    fn test_stats_accounting() {
        let registered = RegisteredHandler::new(RequestKind::Status, Handler::Status);
        assert_eq!(registered.stats().success_rate, 100.0);

        registered.record(Duration::from_millis(10), true);
        registered.record(Duration::from_millis(30), false);

        let stats = registered.stats();
        assert_eq!(stats.execution_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.average_duration_ms, 20);
        assert_eq!(stats.success_rate, 50.0);
    }
}
