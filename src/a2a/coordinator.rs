//! A2A request/response coordination over an at-least-once bus.

use bytes::Bytes;
use metrics::counter;
use moka::future::Cache;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{A2aError, MalformedMessage};
use super::handler::{HandlerRegistry, RequestContext};
use super::message::{AgentId, AgentMessage, MessageType, RequestKind};
use super::pending::{PendingRequest, PendingTable, RequestOutcome};
use crate::config::CoordinatorConfig;
use crate::network::{Envelope, EventKind, Transport, TransportError};

/// What `on_message` / `handle_frame` did with an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Response handed to its waiter
    Delivered,
    /// Response with no pending request (late, duplicate or foreign)
    Unmatched,
    /// Request routed to a handler
    Dispatched,
    /// Request already handled recently
    Duplicate,
    /// Non-A2A event for the node (ingestion)
    Forward(Box<Envelope>),
    /// Well-formed event this node does not consume
    Ignored(String),
    /// Dropped
    Rejected(MalformedMessage),
}

/// Coordinates outbound requests and dispatches inbound ones.
pub struct A2aCoordinator {
    agent_id: AgentId,
    transport: Arc<dyn Transport>,
    pending: PendingTable,
    registry: HandlerRegistry,
    recent_requests: Cache<Uuid, ()>,
    config: CoordinatorConfig,
}

impl A2aCoordinator {
    /// Create a coordinator speaking for `agent_id` on `transport`.
    pub fn new(
        agent_id: AgentId,
        transport: Arc<dyn Transport>,
        registry: HandlerRegistry,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let recent_requests = Cache::builder()
            .max_capacity(config.duplicate_capacity)
            .time_to_live(config.duplicate_window())
            .build();

        Arc::new(Self {
            agent_id,
            transport,
            pending: PendingTable::new(),
            registry,
            recent_requests,
            config,
        })
    }

    /// Agent used as `from_agent` on outbound requests
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Handlers for inbound requests
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Retry, timeout and sweep settings
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Name of the underlying transport (`memory`, `nats`)
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `correlation_id` is still waiting for a response
    pub fn is_pending(&self, correlation_id: &Uuid) -> bool {
        self.pending.contains(correlation_id)
    }

    /// [`send_request`](Self::send_request) with the configured
    /// `coordinator.request_timeout_ms` deadline.
    pub async fn request(
        &self,
        to_agent: AgentId,
        request_type: RequestKind,
        payload: JsonValue,
    ) -> Result<AgentMessage, A2aError> {
        self.send_request(to_agent, request_type, payload, self.config.request_timeout())
            .await
    }

    /// Send a request and wait for its response.
    ///
    /// Fails with `Timeout` when no response arrives before `timeout`,
    /// `Transport` when publishing fails on every attempt, `Remote` when
    /// the peer answers with an error and `Cancelled` on `cancel`.
    pub async fn send_request(
        &self,
        to_agent: AgentId,
        request_type: RequestKind,
        payload: JsonValue,
        timeout: Duration,
    ) -> Result<AgentMessage, A2aError> {
        self.start_request(to_agent, request_type, payload, timeout)
            .await?
            .wait()
            .await
    }

    /// Register and publish a request, returning a handle to await the
    /// response. The correlation id is available before waiting, so the
    /// request can be cancelled from elsewhere.
    pub async fn start_request(
        &self,
        to_agent: AgentId,
        request_type: RequestKind,
        payload: JsonValue,
        timeout: Duration,
    ) -> Result<ResponseHandle<'_>, A2aError> {
        let request = AgentMessage::request(self.agent_id.clone(), to_agent, request_type, payload);
        let correlation_id = request.correlation_id;
        let deadline = Instant::now() + timeout;

        let rx = self.pending.register(
            correlation_id,
            request.to_agent.clone(),
            request_type,
            deadline,
        );
        let guard = PendingGuard {
            pending: &self.pending,
            correlation_id,
            armed: true,
        };

        counter!("a2a_requests_total", "request_type" => request_type.as_str()).increment(1);
        debug!(
            correlation_id = %correlation_id,
            to = %request.to_agent,
            request_type = %request_type,
            "Sending A2A request"
        );

        // On failure the guard drops and removes the entry. Running out of
        // time while retrying is left to `wait`, which reports `Timeout`.
        self.publish_message(
            &request,
            Some(Tracked {
                correlation_id,
                deadline,
            }),
        )
        .await?;

        Ok(ResponseHandle {
            correlation_id,
            deadline,
            rx,
            guard,
        })
    }

    /// Publish a one-way request. Nothing is registered as pending; kinds
    /// for which [`RequestKind::expects_reply`] is false get no answer.
    pub async fn notify(
        &self,
        to_agent: AgentId,
        request_type: RequestKind,
        payload: JsonValue,
    ) -> Result<Uuid, A2aError> {
        let msg = AgentMessage::request(self.agent_id.clone(), to_agent, request_type, payload);
        counter!("a2a_notifications_total", "request_type" => request_type.as_str()).increment(1);
        debug!(
            correlation_id = %msg.correlation_id,
            to = %msg.to_agent,
            request_type = %request_type,
            "Sending A2A notification"
        );
        self.publish_message(&msg, None).await?;
        Ok(msg.correlation_id)
    }

    /// Publish a non-A2A event to `to`'s inbox with the same retry policy.
    pub async fn publish_event(&self, to: &AgentId, envelope: &Envelope) -> Result<(), A2aError> {
        let frame = envelope
            .encode()
            .map_err(|source| A2aError::Transport { attempts: 0, source })?;
        self.publish_with_retry(to, frame, envelope.event_id, None).await
    }

    /// Resolve a pending request with `Cancelled`. Returns false when the
    /// request already completed.
    pub fn cancel(&self, correlation_id: &Uuid) -> bool {
        match self.pending.remove(correlation_id) {
            Some(entry) => {
                debug!(correlation_id = %correlation_id, "A2A request cancelled");
                entry.resolve(Err(A2aError::Cancelled(*correlation_id)));
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request (shutdown).
    pub fn cancel_all(&self) -> usize {
        let drained = self.pending.drain_all();
        let count = drained.len();
        for entry in drained {
            let id = entry.correlation_id;
            entry.resolve(Err(A2aError::Cancelled(id)));
        }
        count
    }

    /// Resolve every expired request with `Timeout`. Returns how many.
    pub fn sweep(&self) -> usize {
        let expired = self.pending.drain_expired(Instant::now());
        let count = expired.len();
        for entry in expired {
            resolve_timeout(entry);
        }
        if count > 0 {
            debug!(count, "Swept expired A2A requests");
        }
        count
    }

    /// Decode and handle one raw frame from an inbox.
    pub async fn handle_frame(self: &Arc<Self>, frame: &[u8]) -> Disposition {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject(e),
        };
        match envelope.kind() {
            Ok(EventKind::A2a(_)) => {}
            Ok(EventKind::Ingest { .. }) => return Disposition::Forward(Box::new(envelope)),
            Ok(EventKind::Application) => {
                debug!(event_type = %envelope.event_type, "Ignoring event not addressed to agents");
                return Disposition::Ignored(envelope.event_type);
            }
            Err(e) => return self.reject(e),
        }
        match envelope.into_message() {
            Ok(msg) => self.on_message(msg).await,
            Err(e) => self.reject(e),
        }
    }

    /// Handle one inbound A2A message.
    pub async fn on_message(self: &Arc<Self>, msg: AgentMessage) -> Disposition {
        match msg.message_type {
            MessageType::Response | MessageType::Error => self.deliver(msg),
            MessageType::Request => self.dispatch(msg).await,
        }
    }

    fn deliver(&self, msg: AgentMessage) -> Disposition {
        let Some(entry) = self.pending.remove(&msg.correlation_id) else {
            counter!("a2a_unmatched_responses_total").increment(1);
            debug!(
                correlation_id = %msg.correlation_id,
                from = %msg.from_agent,
                "Dropping unmatched A2A response"
            );
            return Disposition::Unmatched;
        };

        let outcome: RequestOutcome = match msg.message_type {
            MessageType::Error => Err(A2aError::Remote {
                agent: msg.from_agent.clone(),
                reason: msg.error_reason(),
            }),
            _ => Ok(msg),
        };
        if !entry.resolve(outcome) {
            debug!("A2A waiter gone before delivery");
        }
        Disposition::Delivered
    }

    async fn dispatch(self: &Arc<Self>, msg: AgentMessage) -> Disposition {
        if !self.registry.hosts(&msg.to_agent) {
            return self.reject(MalformedMessage::UnknownAgent(msg.to_agent.clone()));
        }

        let fresh = self
            .recent_requests
            .entry(msg.correlation_id)
            .or_insert(())
            .await
            .is_fresh();
        if !fresh {
            debug!(correlation_id = %msg.correlation_id, "Duplicate A2A request suppressed");
            return Disposition::Duplicate;
        }

        let Some(registered) = self.registry.route(&msg.to_agent, msg.request_type) else {
            let err = MalformedMessage::UnsupportedRequest {
                agent: msg.to_agent.clone(),
                kind: msg.request_type,
            };
            if msg.request_type.expects_reply() {
                let reply = msg.error_to(err.to_string());
                if let Err(e) = self.publish_message(&reply, None).await {
                    warn!(error = %e, "Failed to publish A2A error reply");
                }
            }
            return self.reject(err);
        };

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let ctx = RequestContext {
                agent: msg.to_agent.clone(),
                caller: msg.from_agent.clone(),
                correlation_id: msg.correlation_id,
                coordinator: Arc::clone(&coordinator),
            };
            let reply = match registered.invoke_tracked(&ctx, msg.payload.clone()).await {
                Ok(payload) => msg.response_to(payload),
                Err(e) => {
                    warn!(
                        correlation_id = %msg.correlation_id,
                        request_type = %msg.request_type,
                        error = %e,
                        "A2A handler failed"
                    );
                    msg.error_to(e.to_string())
                }
            };
            if !msg.request_type.expects_reply() {
                return;
            }
            if let Err(e) = coordinator.publish_message(&reply, None).await {
                warn!(
                    correlation_id = %msg.correlation_id,
                    error = %e,
                    "Failed to publish A2A reply"
                );
            }
        });

        Disposition::Dispatched
    }

    fn reject(&self, reason: MalformedMessage) -> Disposition {
        counter!("a2a_malformed_messages_total").increment(1);
        warn!(reason = %reason, "Dropping inbound message");
        Disposition::Rejected(reason)
    }

    async fn publish_message(
        &self,
        msg: &AgentMessage,
        tracked: Option<Tracked>,
    ) -> Result<(), A2aError> {
        let frame: Bytes = Envelope::from_message(msg)
            .encode()
            .map_err(|source| A2aError::Transport {
                attempts: 0,
                source,
            })?;
        self.publish_with_retry(&msg.to_agent, frame, msg.correlation_id, tracked)
            .await
    }

    /// Publish with exponential backoff on transient errors.
    ///
    /// For a tracked request, retries are recorded on its pending entry and
    /// stop without error once the entry is resolved elsewhere or its
    /// deadline passes; backoff sleeps never run past the deadline.
    async fn publish_with_retry(
        &self,
        to: &AgentId,
        frame: Bytes,
        id: Uuid,
        tracked: Option<Tracked>,
    ) -> Result<(), A2aError> {
        let mut retry = 0u32;
        loop {
            if let Some(t) = &tracked {
                if !self.pending.contains(&t.correlation_id) || Instant::now() >= t.deadline {
                    debug!(correlation_id = %id, retry, "A2A request settled before publish");
                    return Ok(());
                }
            }

            match self.transport.publish(to, frame.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && retry < self.config.max_retries => {
                    retry += 1;
                    let mut delay = self.config.backoff.delay_for(retry);
                    if let Some(t) = &tracked {
                        self.pending.record_retry(&t.correlation_id);
                        delay = delay.min(t.deadline.saturating_duration_since(Instant::now()));
                    }
                    warn!(
                        id = %id,
                        to = %to,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "A2A publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    return Err(A2aError::Transport {
                        attempts: retry + 1,
                        source,
                    })
                }
            }
        }
    }

    /// Subscribe `agent`'s inbox and pump it until shutdown. Ingestion
    /// events are passed to `events` when given, otherwise dropped.
    pub async fn listen(
        self: &Arc<Self>,
        agent: &AgentId,
        mut shutdown: watch::Receiver<bool>,
        events: Option<mpsc::Sender<Envelope>>,
    ) -> Result<JoinHandle<()>, TransportError> {
        let mut inbox = self.transport.subscribe(agent).await?;
        let coordinator = Arc::clone(self);
        let agent = agent.clone();
        info!(agent = %agent, transport = coordinator.transport_name(), "Listening for A2A messages");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = inbox.recv() => {
                        let Some(frame) = frame else { break };
                        if let Disposition::Forward(envelope) = coordinator.handle_frame(&frame).await {
                            match &events {
                                Some(tx) => {
                                    if tx.send(*envelope).await.is_err() {
                                        debug!("Event consumer gone");
                                    }
                                }
                                None => debug!(event_type = %envelope.event_type, "No event consumer, dropped"),
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(agent = %agent, "Inbox pump stopped");
        }))
    }
}

fn resolve_timeout(entry: PendingRequest) {
    counter!("a2a_timeouts_total").increment(1);
    let err = entry.timeout_error();
    debug!(correlation_id = %entry.correlation_id, to = %entry.to_agent, "A2A request timed out");
    entry.resolve(Err(err));
}

/// Pending request a publish belongs to.
struct Tracked {
    correlation_id: Uuid,
    deadline: Instant,
}

/// Removes the pending entry when the request is abandoned.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    correlation_id: Uuid,
    armed: bool,
}

impl PendingGuard<'_> {
    fn take(&mut self) -> Option<PendingRequest> {
        self.armed = false;
        self.pending.remove(&self.correlation_id)
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.pending.remove(&self.correlation_id).is_some() {
            debug!(correlation_id = %self.correlation_id, "Abandoned A2A request removed");
        }
    }
}

/// An in-flight request.
pub struct ResponseHandle<'a> {
    correlation_id: Uuid,
    deadline: Instant,
    rx: oneshot::Receiver<RequestOutcome>,
    guard: PendingGuard<'a>,
}

impl ResponseHandle<'_> {
    /// Correlation id of the request, usable with `cancel`
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Wait for the response, deadline or cancellation.
    pub async fn wait(self) -> Result<AgentMessage, A2aError> {
        let ResponseHandle {
            correlation_id,
            deadline,
            mut rx,
            mut guard,
        } = self;

        let outcome = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(A2aError::Cancelled(correlation_id)),
            Err(_) => match guard.take() {
                Some(entry) => {
                    let err = entry.timeout_error();
                    resolve_timeout(entry);
                    Err(err)
                }
                // Someone else removed the entry and owns its resolution.
                None => rx.await.unwrap_or(Err(A2aError::Cancelled(correlation_id))),
            },
        };
        guard.disarm();
        outcome
    }
}
