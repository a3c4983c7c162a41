//! Agent node: wires transport, coordinator, workflow and index together.
//!
//! A node hosts one agent (its configured role) and, with
//! [`AgentNodeBuilder::colocate_peer`], the counterpart agent as well, so a
//! single process can serve both sides of peer validation over the
//! in-memory bus.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::a2a::{spawn_sweeper, A2aCoordinator, AgentId, Handler, HandlerRegistry, RequestKind};
use crate::config::{EmbeddingModelKind, IndexBackend, NodeConfig, TransportKind};
use crate::error::{Error, Result};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::network::{Envelope, InMemoryBus, NatsTransport, Transport};
use crate::ranking::RankingEngine;
use crate::search::{CachedEmbedder, Embedder, HashingEmbedder, InMemoryIndex, SimilarityIndex, TimeBoundIndex};
use crate::types::{AgentRole, MatchRequest};
use crate::workflow::{
    CoordinatorPeer, FollowUp, MatchValidator, PeerDelegate, WorkflowEngine, WorkflowRun,
};

/// Node lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Node health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealth {
    pub status: NodeStatus,
    /// Uptime in seconds (if running)
    pub uptime_seconds: Option<u64>,
    pub last_error: Option<String>,
    pub metrics: HashMap<String, serde_json::Value>,
}

/// Builder for [`AgentNode`].
///
/// Components not supplied explicitly are created from the configuration.
pub struct AgentNodeBuilder {
    config: NodeConfig,
    transport: Option<Arc<dyn Transport>>,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn SimilarityIndex>>,
    colocate_peer: bool,
}

impl AgentNodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            transport: None,
            embedder: None,
            index: None,
            colocate_peer: false,
        }
    }

    /// Use an existing transport (e.g. a bus shared with other nodes)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use an existing embedder instead of the configured model
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use an existing index. It is still wrapped in the configured query budget.
    pub fn index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Also host the peer agent on this node
    pub fn colocate_peer(mut self, enabled: bool) -> Self {
        self.colocate_peer = enabled;
        self
    }

    /// Build the node
    pub async fn build(self) -> Result<AgentNode> {
        let config = self.config;
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => build_transport(&config).await?,
        };
        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => build_embedder(&config)?,
        };
        if embedder.dimension() != config.index.dimension {
            return Err(Error::Config(format!(
                "embedding dimension {} does not match index dimension {}",
                embedder.dimension(),
                config.index.dimension
            )));
        }
        let inner_index = match self.index {
            Some(index) => index,
            None => build_index(&config).await?,
        };
        let index: Arc<dyn SimilarityIndex> =
            Arc::new(TimeBoundIndex::new(inner_index, config.index.query_budget()));

        let agent = config.agent.agent_id();
        let mut peer = config.agent.peer_id();
        if self.colocate_peer && peer.is_none() {
            peer = Some(AgentId::new(config.agent.role.default_peer_id()));
        }

        let engine = Arc::new(WorkflowEngine::new(
            config.agent.role,
            embedder.clone(),
            index.clone(),
            RankingEngine::new(config.ranking.clone()),
            config.workflow.clone(),
        ));
        let validator = Arc::new(MatchValidator::new(
            config.workflow.peer_validation.min_skill_coverage,
        ));

        let mut registry = HandlerRegistry::new();
        let mut hosted = vec![agent.clone()];
        register_agent(&mut registry, &agent, engine.clone(), validator.clone(), peer.clone());

        if self.colocate_peer {
            if let Some(peer_id) = &peer {
                let peer_engine = Arc::new(WorkflowEngine::new(
                    config.agent.role.counterpart(),
                    embedder.clone(),
                    index.clone(),
                    RankingEngine::new(config.ranking.clone()),
                    config.workflow.clone(),
                ));
                register_agent(&mut registry, peer_id, peer_engine, validator, Some(agent.clone()));
                hosted.push(peer_id.clone());
            }
        }

        let coordinator = A2aCoordinator::new(
            agent.clone(),
            transport,
            registry,
            config.coordinator.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            agent = %agent,
            role = ?config.agent.role,
            peer = ?peer.as_ref().map(|p| p.to_string()),
            hosted = hosted.len(),
            "Agent node built"
        );

        Ok(AgentNode {
            role: config.agent.role,
            peer,
            hosted,
            coordinator,
            engine,
            ingestor: Ingestor::new(embedder, index),
            config,
            state: Mutex::new(Lifecycle::default()),
            shutdown_tx,
        })
    }
}

fn register_agent(
    registry: &mut HandlerRegistry,
    agent: &AgentId,
    engine: Arc<WorkflowEngine>,
    validator: Arc<MatchValidator>,
    peer: Option<AgentId>,
) {
    registry.register(agent.clone(), RequestKind::FindMatches, Handler::FindMatches { engine, peer });
    registry.register(agent.clone(), RequestKind::ValidateMatch, Handler::ValidateMatch(validator));
    registry.register(agent.clone(), RequestKind::Status, Handler::Status);
    registry.register(agent.clone(), RequestKind::MatchFound, Handler::MatchFound);
}

async fn build_transport(config: &NodeConfig) -> Result<Arc<dyn Transport>> {
    let settings = &config.transport;
    Ok(match settings.kind {
        TransportKind::Memory => Arc::new(InMemoryBus::new(settings.inbound_buffer)),
        TransportKind::Nats => Arc::new(
            NatsTransport::connect(
                &settings.nats_url,
                settings.subject_prefix.clone(),
                settings.inbound_buffer,
            )
            .await?,
        ),
    })
}

fn build_embedder(config: &NodeConfig) -> Result<Arc<dyn Embedder>> {
    let settings = &config.embedding;
    let inner: Arc<dyn Embedder> = match settings.model {
        EmbeddingModelKind::Hashing => Arc::new(HashingEmbedder::new(
            config.index.dimension,
            settings.max_chars,
        )),
        #[cfg(feature = "fastembed")]
        EmbeddingModelKind::FastEmbed => {
            Arc::new(crate::search::FastEmbedder::try_new(settings.max_chars)?)
        }
        #[cfg(not(feature = "fastembed"))]
        EmbeddingModelKind::FastEmbed => {
            return Err(Error::Config(
                "embedding.model = \"fastembed\" requires the `fastembed` feature".to_string(),
            ))
        }
    };
    Ok(Arc::new(CachedEmbedder::new(
        inner,
        settings.cache_capacity,
        std::time::Duration::from_secs(settings.cache_ttl_secs),
    )))
}

async fn build_index(config: &NodeConfig) -> Result<Arc<dyn SimilarityIndex>> {
    let settings = &config.index;
    match settings.backend {
        IndexBackend::Memory => Ok(Arc::new(InMemoryIndex::new(settings.dimension))),
        #[cfg(feature = "qdrant")]
        IndexBackend::Qdrant => Ok(Arc::new(
            crate::search::QdrantIndex::connect(
                &settings.qdrant_url,
                &settings.collection_prefix,
                &settings.collection,
                settings.dimension,
            )
            .await?,
        )),
        #[cfg(not(feature = "qdrant"))]
        IndexBackend::Qdrant => Err(Error::Config(
            "index.backend = \"qdrant\" requires the `qdrant` feature".to_string(),
        )),
    }
}

#[derive(Default)]
struct Lifecycle {
    status: NodeStatus,
    started_at: Option<Instant>,
    last_error: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

/// A running (or runnable) agent node.
pub struct AgentNode {
    role: AgentRole,
    peer: Option<AgentId>,
    hosted: Vec<AgentId>,
    coordinator: Arc<A2aCoordinator>,
    engine: Arc<WorkflowEngine>,
    ingestor: Ingestor,
    config: NodeConfig,
    state: Mutex<Lifecycle>,
    shutdown_tx: watch::Sender<bool>,
}

impl AgentNode {
    /// Start building a node from `config`
    pub fn builder(config: NodeConfig) -> AgentNodeBuilder {
        AgentNodeBuilder::new(config)
    }

    /// Id of the primary hosted agent
    pub fn agent_id(&self) -> &AgentId {
        self.coordinator.agent_id()
    }

    /// Role of the primary hosted agent
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Agent asked to validate recommendations, if any
    pub fn peer(&self) -> Option<&AgentId> {
        self.peer.as_ref()
    }

    /// Agents whose inboxes this node serves.
    pub fn hosted_agents(&self) -> &[AgentId] {
        &self.hosted
    }

    /// Coordinator shared by every hosted agent
    pub fn coordinator(&self) -> &Arc<A2aCoordinator> {
        &self.coordinator
    }

    /// Configuration the node was built from
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current lifecycle status
    pub fn status(&self) -> NodeStatus {
        self.lifecycle().status
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe hosted inboxes and start the background tasks.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.lifecycle();
            if matches!(state.status, NodeStatus::Running | NodeStatus::Starting) {
                return Ok(());
            }
            state.status = NodeStatus::Starting;
        }
        self.shutdown_tx.send_replace(false);

        match self.spawn_tasks().await {
            Ok(tasks) => {
                let mut state = self.lifecycle();
                state.tasks = tasks;
                state.status = NodeStatus::Running;
                state.started_at = Some(Instant::now());
                info!(agent = %self.agent_id(), agents = self.hosted.len(), "Agent node running");
                Ok(())
            }
            Err(e) => {
                // Stop whatever did start.
                self.shutdown_tx.send_replace(true);
                let mut state = self.lifecycle();
                state.status = NodeStatus::Error;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn spawn_tasks(&self) -> Result<Vec<JoinHandle<()>>> {
        let buffer = self.config.transport.inbound_buffer.max(1);
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let mut tasks = Vec::new();

        for agent in &self.hosted {
            let task = self
                .coordinator
                .listen(agent, self.shutdown_tx.subscribe(), Some(events_tx.clone()))
                .await?;
            tasks.push(task);
        }
        drop(events_tx);

        tasks.push(spawn_ingest_pump(
            self.ingestor.clone(),
            events_rx,
            self.shutdown_tx.subscribe(),
        ));
        tasks.push(spawn_sweeper(
            self.coordinator.clone(),
            self.config.coordinator.sweep_interval(),
            self.shutdown_tx.subscribe(),
        ));
        Ok(tasks)
    }

    /// Stop background tasks and fail every outstanding request.
    pub async fn shutdown(&self) {
        let tasks = {
            let mut state = self.lifecycle();
            if state.status == NodeStatus::Stopped {
                return;
            }
            state.status = NodeStatus::Stopping;
            std::mem::take(&mut state.tasks)
        };

        self.shutdown_tx.send_replace(true);
        let cancelled = self.coordinator.cancel_all();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let mut state = self.lifecycle();
        state.status = NodeStatus::Stopped;
        state.started_at = None;
        info!(agent = %self.agent_id(), cancelled, "Agent node stopped");
    }

    /// Run the matching workflow for a locally submitted request. A
    /// completed run with recommendations triggers the follow-up notices in
    /// the background.
    pub async fn match_request(&self, request: MatchRequest) -> WorkflowRun {
        let requester_id = request.requester_id.clone();
        let delegate = self.peer.as_ref().map(|peer| {
            CoordinatorPeer::new(self.coordinator.clone(), peer.clone(), self.engine.peer_timeout())
        });
        let run = self
            .engine
            .execute(request, delegate.as_ref().map(|d| d as &dyn PeerDelegate))
            .await;
        FollowUp::new(
            self.coordinator.clone(),
            self.config.workflow.follow_up.clone(),
            self.role,
            self.peer.clone(),
        )
        .spawn(&run, requester_id);
        run
    }

    /// Apply one ingestion event to the index.
    pub async fn ingest(&self, envelope: Envelope) -> Result<IngestOutcome> {
        self.ingestor.apply(envelope).await
    }

    /// Status, uptime and node counters
    pub async fn health(&self) -> NodeHealth {
        let indexed = self.ingestor.index().len().await;
        let (status, uptime_seconds, last_error) = {
            let state = self.lifecycle();
            (
                state.status,
                state.started_at.map(|t| t.elapsed().as_secs()),
                state.last_error.clone(),
            )
        };

        let mut metrics = HashMap::new();
        metrics.insert("agent".to_string(), serde_json::json!(self.agent_id()));
        metrics.insert("hosted_agents".to_string(), serde_json::json!(self.hosted));
        metrics.insert(
            "transport".to_string(),
            serde_json::json!(self.coordinator.transport_name()),
        );
        metrics.insert(
            "pending_requests".to_string(),
            serde_json::json!(self.coordinator.pending_count()),
        );
        match indexed {
            Ok(n) => {
                metrics.insert("indexed_entities".to_string(), serde_json::json!(n));
            }
            Err(e) => {
                metrics.insert("index_error".to_string(), serde_json::json!(e.to_string()));
            }
        }

        NodeHealth {
            status,
            uptime_seconds,
            last_error,
            metrics,
        }
    }
}

fn spawn_ingest_pump(
    ingestor: Ingestor,
    mut events: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                envelope = events.recv() => {
                    let Some(envelope) = envelope else { break };
                    let event_type = envelope.event_type.clone();
                    if let Err(e) = ingestor.apply(envelope).await {
                        warn!(event_type = %event_type, error = %e, "Ingestion event rejected");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Ingest pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_defaults() {
        let node = AgentNode::builder(NodeConfig::default()).build().await.unwrap();
        assert_eq!(node.role(), AgentRole::JobFinder);
        assert_eq!(node.hosted_agents(), &[AgentId::new("job_finder_agent")]);
        assert_eq!(node.status(), NodeStatus::Stopped);
        assert!(node
            .coordinator()
            .registry()
            .route(node.agent_id(), RequestKind::FindMatches)
            .is_some());
    }

    #[tokio::test]
    async fn test_colocated_peer_registered() {
        let node = AgentNode::builder(NodeConfig::default())
            .colocate_peer(true)
            .build()
            .await
            .unwrap();
        let peer = AgentId::new("candidate_finder_agent");
        assert!(node.hosted_agents().contains(&peer));
        assert!(node.coordinator().registry().route(&peer, RequestKind::ValidateMatch).is_some());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let node = AgentNode::builder(NodeConfig::default()).build().await.unwrap();
        node.start().await.unwrap();
        assert_eq!(node.status(), NodeStatus::Running);
        assert!(node.health().await.uptime_seconds.is_some());

        node.shutdown().await;
        assert_eq!(node.status(), NodeStatus::Stopped);
    }

    #[tokio::test]
    async fn test_rejects_dimension_mismatch() {
        let result = AgentNode::builder(NodeConfig::default())
            .embedder(Arc::new(HashingEmbedder::new(8, 100)))
            .build()
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
