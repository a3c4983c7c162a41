//! JobMesh node: job and candidate matching agents.
//!
//! Two agents, a job finder and a candidate finder, answer match requests by
//! embedding the requester's profile, querying a similarity index and ranking
//! the results with rule-based adjustments. They talk to each other over a
//! message bus through the [`a2a`] coordinator to cross-validate
//! recommendations.

pub mod a2a;
pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod network;
pub mod node;
pub mod ranking;
pub mod search;
pub mod types;
pub mod workflow;

pub use a2a::{A2aCoordinator, A2aError, AgentId, AgentMessage, HandlerRegistry, RequestKind};
pub use api::{ApiServer, AppState};
pub use config::{ApiConfig, NodeConfig};
pub use error::{Error, Result};
pub use ingest::{IngestOutcome, Ingestor};
pub use network::{Envelope, InMemoryBus, NatsTransport, Transport, TransportError};
pub use node::{AgentNode, AgentNodeBuilder, NodeHealth, NodeStatus};
pub use ranking::{RankingEngine, RankingWeights};
pub use search::{Embedder, HashingEmbedder, InMemoryIndex, SimilarityIndex};
pub use types::{AgentRole, EntityKind, MatchCandidate, MatchRequest, MatchResponse};
pub use workflow::{WorkflowEngine, WorkflowRun};

static_assertions::assert_impl_all!(A2aCoordinator: Send, Sync);
static_assertions::assert_impl_all!(AgentNode: Send, Sync);
static_assertions::assert_impl_all!(WorkflowEngine: Send, Sync);
static_assertions::assert_impl_all!(InMemoryBus: Send, Sync);
