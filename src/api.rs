//! HTTP API.
//!
//! | Method | Path          | Purpose                                 |
//! |--------|---------------|-----------------------------------------|
//! | GET    | `/health`     | Liveness plus node status               |
//! | POST   | `/v1/match`   | Run the matching workflow               |
//! | POST   | `/v1/events`  | Apply a job/candidate ingestion event   |
//! | GET    | `/metrics`    | Prometheus exposition                   |

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::ingest::IngestOutcome;
use crate::network::Envelope;
use crate::node::{AgentNode, NodeHealth};
use crate::search::IndexError;
use crate::types::{MatchRequest, MatchResponse};
use crate::workflow::{FailureReason, StateKind, WorkflowFailure};

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<AgentNode>,
    /// Prometheus handle; `/metrics` answers 404 without one
    pub metrics: Option<PrometheusHandle>,
    pub start_time: Instant,
}

impl AppState {
    /// State for `node`, with the Prometheus handle behind `/metrics` when installed.
    pub fn new(node: Arc<AgentNode>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            node,
            metrics,
            start_time: Instant::now(),
        }
    }
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub agent: String,
    pub uptime: u64,
    pub node: NodeHealth,
}

/// `POST /v1/match` body on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReply {
    pub run_id: Uuid,
    pub transitions: Vec<StateKind>,
    #[serde(flatten)]
    pub response: MatchResponse,
}

/// `POST /v1/events` body on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventReply {
    pub event_id: Uuid,
    pub outcome: IngestOutcome,
}

/// JSON error body: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StateKind>,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: ErrorDetail {
                    code: code.to_string(),
                    message: message.into(),
                    step: None,
                },
            },
        }
    }
}

impl From<WorkflowFailure> for ApiError {
    fn from(failure: WorkflowFailure) -> Self {
        let status = match failure.reason {
            FailureReason::InvalidRequest => StatusCode::BAD_REQUEST,
            FailureReason::EmbeddingFailed => StatusCode::UNPROCESSABLE_ENTITY,
            FailureReason::IndexUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            FailureReason::SearchFailed | FailureReason::RankingFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let mut err = ApiError::new(status, failure.reason.code(), failure.detail);
        err.body.error.step = Some(failure.step);
        err
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::Malformed(_) => ApiError::new(StatusCode::BAD_REQUEST, "MALFORMED_EVENT", err.to_string()),
            Error::Ingest(_) => ApiError::new(StatusCode::BAD_REQUEST, "INVALID_RECORD", err.to_string()),
            Error::Embedding(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "EMBEDDING_FAILED", err.to_string())
            }
            Error::Index(IndexError::Unavailable(_)) => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "INDEX_UNAVAILABLE", err.to_string())
            }
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP API server.
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    /// Server for `config` sharing an existing state.
    pub fn with_state(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with CORS and request tracing.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health))
            .route("/v1/match", post(match_request))
            .route("/v1/events", post(ingest_event))
            .route("/metrics", get(render_metrics))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            router = router.layer(self.cors_layer());
        }
        router
    }

    fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);

        if self.config.cors_origins.is_empty() {
            return layer.allow_origin(Any);
        }
        let origins: Vec<HeaderValue> = self
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }

    /// Serve on `addr` until the listener fails.
    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Api(format!("failed to bind {}: {}", addr, e)))?;
        info!(addr = %addr, "HTTP API listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Api(e.to_string()))
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let node = state.node.health().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agent: state.node.agent_id().to_string(),
        uptime: state.start_time.elapsed().as_secs(),
        node,
    })
}

async fn match_request(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> std::result::Result<Json<MatchReply>, ApiError> {
    let run = state.node.match_request(request).await;
    let response = run.outcome?;
    Ok(Json(MatchReply {
        run_id: run.run_id,
        transitions: run.transitions,
        response,
    }))
}

async fn ingest_event(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> std::result::Result<Json<EventReply>, ApiError> {
    let event_id = envelope.event_id;
    let outcome = state.node.ingest(envelope).await?;
    Ok(Json(EventReply { event_id, outcome }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "METRICS_DISABLED", "metrics exporter not installed")
            .into_response(),
    }
}
