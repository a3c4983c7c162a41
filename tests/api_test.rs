//! HTTP API tests.

use axum::http::StatusCode;
use axum_test::TestServer;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

use jobmesh_node::api::{ErrorBody, EventReply, HealthResponse, MatchReply};
use jobmesh_node::config::ApiConfig;
use jobmesh_node::ingest::IngestOutcome;
use jobmesh_node::network::{Envelope, IngestOp};
use jobmesh_node::types::EntityKind;
use jobmesh_node::workflow::StateKind;
use jobmesh_node::{AgentNode, ApiServer, AppState, NodeConfig};

async fn server_with(metrics: bool) -> TestServer {
    let mut config = NodeConfig::default();
    config.agent.peer = None;
    let node = Arc::new(AgentNode::builder(config).build().await.unwrap());
    let handle = metrics.then(|| PrometheusBuilder::new().build_recorder().handle());

    let server = ApiServer::with_state(ApiConfig::default(), AppState::new(node, handle));
    TestServer::new(server.router()).unwrap()
}

fn job_event(id: u32, op: IngestOp) -> Envelope {
    Envelope::ingest(
        EntityKind::Job,
        op,
        "job-board",
        json!({"id": id, "title": "Rust engineer", "skills": ["rust", "tokio"], "location": "Berlin"}),
    )
}

#[tokio::test]
async fn test_health() {
    let server = server_with(false).await;

    let response = server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.agent, "job_finder_agent");
    assert_eq!(health.node.metrics["indexed_entities"], 0);
}

#[tokio::test]
async fn test_ingest_then_match() {
    let server = server_with(false).await;

    let response = server.post("/v1/events").json(&job_event(1, IngestOp::Created)).await;
    response.assert_status_ok();
    let reply: EventReply = response.json();
    assert_eq!(reply.outcome, IngestOutcome::Indexed("job:1".into()));

    let response = server
        .post("/v1/match")
        .json(&json!({
            "requester_id": "candidate:3",
            "free_text_message": "Rust developer, skills: Rust, Tokio",
            "structured_preferences": {"location": "Berlin"}
        }))
        .await;
    response.assert_status_ok();
    let reply: MatchReply = response.json();
    assert_eq!(reply.transitions.last(), Some(&StateKind::Completed));
    assert_eq!(reply.response.recommendations[0].entity_id, "job:1");

    let response = server.post("/v1/events").json(&job_event(1, IngestOp::Deleted)).await;
    let reply: EventReply = response.json();
    assert_eq!(reply.outcome, IngestOutcome::Removed("job:1".into()));
}

#[tokio::test]
async fn test_invalid_match_request() {
    let server = server_with(false).await;

    let response = server
        .post("/v1/match")
        .json(&json!({"requester_id": "candidate:3", "free_text_message": "   "}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert_eq!(body.error.code, "INVALID_REQUEST");
    assert_eq!(body.error.step, Some(StateKind::Start));
}

#[tokio::test]
async fn test_rejects_bad_event() {
    let server = server_with(false).await;

    let mut envelope = job_event(1, IngestOp::Created);
    envelope.data = json!({"title": "no id"});
    let response = server.post("/v1/events").json(&envelope).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert_eq!(body.error.code, "INVALID_RECORD");

    let mut envelope = job_event(1, IngestOp::Created);
    envelope.event_type = "job.archived".into();
    let response = server.post("/v1/events").json(&envelope).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert_eq!(body.error.code, "MALFORMED_EVENT");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = server_with(true).await;
    server.get("/metrics").await.assert_status_ok();

    let server = server_with(false).await;
    let response = server.get("/metrics").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: JsonValue = response.json();
    assert_eq!(body["error"]["code"], "METRICS_DISABLED");
}
