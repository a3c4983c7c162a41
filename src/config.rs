//! Node configuration.
//!
//! Configuration is read from a TOML file (see `jobmesh init`) and may be
//! overridden by `JOBMESH_*` environment variables and CLI flags.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::a2a::{AgentId, BackoffPolicy};
use crate::error::{Error, Result};
use crate::ranking::RankingWeights;
use crate::types::AgentRole;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "JOBMESH_";

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub agent: AgentConfig,
    pub transport: TransportConfig,
    pub coordinator: CoordinatorConfig,
    pub workflow: WorkflowConfig,
    pub ranking: RankingWeights,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub api: ApiConfig,
}

/// Identity of the agent hosted by this node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent identifier used as the bus address
    pub id: String,
    /// Matching role
    pub role: AgentRole,
    /// Peer agent asked to cross-validate recommendations
    pub peer: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let role = AgentRole::JobFinder;
        Self {
            id: role.default_agent_id().to_string(),
            role,
            peer: Some(role.default_peer_id().to_string()),
        }
    }
}

impl AgentConfig {
    /// Id of the hosted agent
    pub fn agent_id(&self) -> AgentId {
        AgentId::new(&self.id)
    }

    /// Configured peer, if any
    pub fn peer_id(&self) -> Option<AgentId> {
        self.peer.as_deref().map(AgentId::new)
    }
}

/// Which bus implementation to use.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process bus (single node or colocated agents)
    #[default]
    Memory,
    /// NATS message bus
    Nats,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(TransportKind::Memory),
            "nats" => Ok(TransportKind::Nats),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Message bus settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// NATS server URL
    pub nats_url: String,
    /// Subject prefix; agents listen on `<prefix>.agents.<agent_id>`
    pub subject_prefix: String,
    /// Inbound frame buffer per subscription
    pub inbound_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Memory,
            nats_url: "nats://localhost:4222".to_string(),
            subject_prefix: "jobmesh".to_string(),
            inbound_buffer: 1024,
        }
    }
}

/// A2A coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Deadline for requests sent without an explicit timeout
    pub request_timeout_ms: u64,
    /// Publish retries on transient transport errors
    pub max_retries: u32,
    /// Backoff between publish retries
    pub backoff: BackoffPolicy,
    /// Period of the expired-request sweeper
    pub sweep_interval_ms: u64,
    /// How long handled request ids are remembered for duplicate suppression
    pub duplicate_window_secs: u64,
    /// Maximum remembered request ids
    pub duplicate_capacity: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            sweep_interval_ms: 250,
            duplicate_window_secs: 300,
            duplicate_capacity: 10_000,
        }
    }
}

impl CoordinatorConfig {
    /// Deadline used by [`A2aCoordinator::request`](crate::a2a::A2aCoordinator::request)
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }
}

/// Peer cross-validation during the summarize step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeerValidationConfig {
    pub enabled: bool,
    /// Deadline for the peer's answer; expiry degrades the result
    pub timeout_ms: u64,
    /// How many top recommendations are sent for validation
    pub top_n: usize,
    /// Minimum share of required skills the peer expects
    pub min_skill_coverage: f32,
}

impl Default for PeerValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 2_000,
            top_n: 3,
            min_skill_coverage: 0.5,
        }
    }
}

impl PeerValidationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Notices sent once a run completes with recommendations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FollowUpConfig {
    /// Send a one-way `match_found` notice to the peer agent
    pub notify_peer: bool,
    /// Publish one `application.recommended` event per recommended job
    pub publish_applications: bool,
    /// Inbox that receives application recommendations
    pub applications_inbox: String,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            notify_peer: true,
            publish_applications: true,
            applications_inbox: "application_tracker".to_string(),
        }
    }
}

/// Matching workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Nearest neighbours fetched from the index (k)
    pub candidate_pool: usize,
    /// Recommendations returned to the caller
    pub max_recommendations: usize,
    /// Adjusted score below which candidates are dropped
    pub min_score: f32,
    /// Pause before the single local retry of an unavailable index
    pub search_retry_backoff_ms: u64,
    pub peer_validation: PeerValidationConfig,
    pub follow_up: FollowUpConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            candidate_pool: 50,
            max_recommendations: 10,
            min_score: 0.0,
            search_retry_backoff_ms: 200,
            peer_validation: PeerValidationConfig::default(),
            follow_up: FollowUpConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn search_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.search_retry_backoff_ms)
    }
}

/// Similarity index backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Memory,
    Qdrant,
}

/// Similarity index settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Vector dimension (must match the embedding model)
    pub dimension: usize,
    /// Time budget for a single query before `IndexUnavailable`
    pub query_budget_ms: u64,
    pub qdrant_url: String,
    pub collection_prefix: String,
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            dimension: crate::search::EMBEDDING_DIM,
            query_budget_ms: 5_000,
            qdrant_url: "http://localhost:6334".to_string(),
            collection_prefix: "jobzee".to_string(),
            collection: "entities".to_string(),
        }
    }
}

impl IndexConfig {
    pub fn query_budget(&self) -> Duration {
        Duration::from_millis(self.query_budget_ms)
    }
}

/// Embedding model selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingModelKind {
    /// Deterministic feature hashing, no model download
    #[default]
    Hashing,
    /// all-MiniLM-L6-v2 via fastembed (requires the `fastembed` feature)
    FastEmbed,
}

/// Embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: EmbeddingModelKind,
    /// Longest accepted input, in characters
    pub max_chars: usize,
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingModelKind::Hashing,
            max_chars: 8_192,
            cache_capacity: 10_000,
            cache_ttl_secs: 3_600,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub listen_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: NodeConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), raw)?;
        Ok(())
    }

    /// Apply `JOBMESH_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (keys include the prefix).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(id) = get("AGENT_ID") {
            self.agent.id = id;
        }
        if let Some(role) = get("AGENT_ROLE") {
            self.agent.role = parse_value("AGENT_ROLE", &role)?;
        }
        if let Some(peer) = get("AGENT_PEER") {
            self.agent.peer = if peer.is_empty() { None } else { Some(peer) };
        }
        if let Some(kind) = get("TRANSPORT") {
            self.transport.kind = parse_value("TRANSPORT", &kind)?;
        }
        if let Some(url) = get("NATS_URL") {
            self.transport.nats_url = url;
        }
        if let Some(ms) = get("REQUEST_TIMEOUT_MS") {
            self.coordinator.request_timeout_ms = parse_value("REQUEST_TIMEOUT_MS", &ms)?;
        }
        if let Some(n) = get("MAX_RETRIES") {
            self.coordinator.max_retries = parse_value("MAX_RETRIES", &n)?;
        }
        if let Some(ms) = get("BACKOFF_BASE_MS") {
            self.coordinator.backoff.base_ms = parse_value("BACKOFF_BASE_MS", &ms)?;
        }
        if let Some(ms) = get("BACKOFF_MAX_MS") {
            self.coordinator.backoff.max_ms = parse_value("BACKOFF_MAX_MS", &ms)?;
        }
        if let Some(ms) = get("INDEX_QUERY_BUDGET_MS") {
            self.index.query_budget_ms = parse_value("INDEX_QUERY_BUDGET_MS", &ms)?;
        }
        if let Some(url) = get("QDRANT_URL") {
            self.index.qdrant_url = url;
        }
        if let Some(inbox) = get("APPLICATIONS_INBOX") {
            self.workflow.follow_up.applications_inbox = inbox;
        }
        if let Some(addr) = get("API_ADDR") {
            self.api.listen_address = addr;
        }

        Ok(())
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.id.trim().is_empty() {
            return Err(Error::Config("agent.id must not be empty".to_string()));
        }
        if self.agent.peer.as_deref() == Some(self.agent.id.as_str()) {
            return Err(Error::Config(
                "agent.peer must differ from agent.id".to_string(),
            ));
        }
        if self.coordinator.request_timeout_ms == 0 {
            return Err(Error::Config(
                "coordinator.request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.coordinator.sweep_interval_ms == 0 {
            return Err(Error::Config(
                "coordinator.sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.coordinator.backoff.factor == 0 {
            return Err(Error::Config(
                "coordinator.backoff.factor must be at least 1".to_string(),
            ));
        }
        if self.index.dimension == 0 {
            return Err(Error::Config(
                "index.dimension must be greater than 0".to_string(),
            ));
        }
        if self.index.query_budget_ms == 0 {
            return Err(Error::Config(
                "index.query_budget_ms must be greater than 0".to_string(),
            ));
        }
        if self.workflow.candidate_pool == 0 || self.workflow.max_recommendations == 0 {
            return Err(Error::Config(
                "workflow.candidate_pool and workflow.max_recommendations must be greater than 0"
                    .to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.workflow.min_score) {
            return Err(Error::Config(
                "workflow.min_score must be within [0, 1]".to_string(),
            ));
        }
        let follow_up = &self.workflow.follow_up;
        if follow_up.publish_applications && follow_up.applications_inbox.trim().is_empty() {
            return Err(Error::Config(
                "workflow.follow_up.applications_inbox must not be empty".to_string(),
            ));
        }
        self.ranking.validate().map_err(Error::Config)?;
        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::Config(format!("{}{}: {}", ENV_PREFIX, key, e)))
}
