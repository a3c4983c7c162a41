//! A2A coordinator over the in-memory bus.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobmesh_node::a2a::{
    spawn_sweeper, A2aCoordinator, A2aError, AgentId, BackoffPolicy, Disposition, Handler,
    HandlerRegistry, MalformedMessage, RequestKind,
};
use jobmesh_node::config::CoordinatorConfig;
use jobmesh_node::network::{Envelope, InMemoryBus, IngestOp, Transport};
use jobmesh_node::types::EntityKind;
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        max_retries: 3,
        backoff: BackoffPolicy {
            base_ms: 10,
            factor: 2,
            max_ms: 40,
        },
        ..CoordinatorConfig::default()
    }
}

struct Pair {
    bus: Arc<InMemoryBus>,
    asker: Arc<A2aCoordinator>,
    peer: Arc<A2aCoordinator>,
    _shutdown: watch::Sender<bool>,
}

async fn pair(config: CoordinatorConfig) -> Pair {
    let bus = Arc::new(InMemoryBus::default());
    let asker = A2aCoordinator::new("asker".into(), bus.clone(), HandlerRegistry::new(), config.clone());
    let peer = A2aCoordinator::new(
        "peer".into(),
        bus.clone(),
        HandlerRegistry::new().with("peer", RequestKind::Status, Handler::Status),
        config,
    );

    let (shutdown, rx) = watch::channel(false);
    asker.listen(&"asker".into(), rx.clone(), None).await.unwrap();
    peer.listen(&"peer".into(), rx, None).await.unwrap();

    Pair {
        bus,
        asker,
        peer,
        _shutdown: shutdown,
    }
}

#[tokio::test]
async fn test_request_response_roundtrip() {
    let p = pair(fast_config()).await;

    let response = p
        .asker
        .send_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response.from_agent, AgentId::new("peer"));
    assert_eq!(response.payload["status"], "ok");
    assert_eq!(response.payload["agent"], "peer");
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_timeout_leaves_no_pending_entry() {
    let p = pair(fast_config()).await;
    p.bus.black_hole(&"peer".into());

    let started = Instant::now();
    let err = p
        .asker
        .send_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let p = pair(fast_config()).await;
    p.bus.set_duplicate_delivery(true);

    let response = p
        .asker
        .send_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.payload["status"], "ok");

    // Let the redelivered request and response drain.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = p.peer.registry().stats_for(&"peer".into());
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].execution_count, 1);
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let p = pair(fast_config()).await;
    p.bus.fail_next_publishes(2);

    let response = p
        .asker
        .send_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(response.payload["status"], "ok");
    // Request and reply; failed attempts are not counted.
    assert_eq!(p.bus.published_count(), 2);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let mut config = fast_config();
    config.max_retries = 2;
    let p = pair(config).await;
    p.bus.fail_next_publishes(10);

    let err = p
        .asker
        .send_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, A2aError::Transport { attempts: 3, .. }));
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_unsupported_request_gets_error_reply() {
    let p = pair(fast_config()).await;

    let err = p
        .asker
        .send_request("peer".into(), RequestKind::FindMatches, json!({}), Duration::from_secs(2))
        .await
        .unwrap_err();

    match err {
        A2aError::Remote { agent, reason } => {
            assert_eq!(agent, AgentId::new("peer"));
            assert!(reason.contains("find_matches"), "reason: {}", reason);
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_in_flight_request() {
    let p = pair(fast_config()).await;
    p.bus.black_hole(&"peer".into());

    let handle = p
        .asker
        .start_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_secs(5))
        .await
        .unwrap();
    let id = handle.correlation_id();

    let asker = p.asker.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        asker.cancel(&id)
    });

    assert_eq!(handle.wait().await, Err(A2aError::Cancelled(id)));
    assert!(canceller.await.unwrap());
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_many_concurrent_requests() {
    let bus = Arc::new(InMemoryBus::default());
    let (_shutdown, rx) = watch::channel(false);
    let asker = A2aCoordinator::new("asker".into(), bus.clone(), HandlerRegistry::new(), fast_config());
    asker.listen(&"asker".into(), rx.clone(), None).await.unwrap();

    let peers: Vec<AgentId> = (0..100).map(|i| AgentId::new(format!("peer-{}", i))).collect();
    let mut registry = HandlerRegistry::new();
    for peer in &peers {
        registry = registry.with(peer.clone(), RequestKind::Status, Handler::Status);
    }
    let responder = A2aCoordinator::new("peer-0".into(), bus.clone(), registry, fast_config());
    for peer in &peers {
        responder.listen(peer, rx.clone(), None).await.unwrap();
    }

    let requests = peers.iter().map(|peer| {
        let asker = asker.clone();
        let peer = peer.clone();
        async move {
            let handle = asker
                .start_request(peer.clone(), RequestKind::Status, JsonValue::Null, Duration::from_secs(5))
                .await
                .unwrap();
            let sent = handle.correlation_id();
            (peer, sent, handle.wait().await)
        }
    });
    let results = futures::future::join_all(requests).await;

    let mut ids = HashSet::new();
    for (peer, sent, result) in results {
        let response = result.unwrap();
        assert_eq!(response.correlation_id, sent);
        assert_eq!(response.from_agent, peer);
        assert_eq!(response.payload["agent"], peer.as_str());
        ids.insert(sent);
    }
    assert_eq!(ids.len(), 100);
    assert_eq!(asker.pending_count(), 0);
}

#[tokio::test]
async fn test_publish_retries_stop_at_deadline() {
    // Default backoff starts at 500ms, well past the request deadline.
    let p = pair(CoordinatorConfig::default()).await;
    let (_stop, stop_rx) = watch::channel(false);
    spawn_sweeper(p.asker.clone(), Duration::from_millis(10), stop_rx);
    p.bus.fail_next_publishes(2);

    let started = Instant::now();
    let err = p
        .asker
        .send_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_millis(400), "took {:?}", started.elapsed());
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_publish_retries_stop_at_deadline_without_sweeper() {
    let p = pair(CoordinatorConfig::default()).await;
    p.bus.fail_next_publishes(2);

    let started = Instant::now();
    let err = p
        .asker
        .send_request("peer".into(), RequestKind::Status, JsonValue::Null, Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_millis(400), "took {:?}", started.elapsed());
    assert_eq!(p.bus.published_count(), 0);
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_request_uses_configured_timeout() {
    let mut config = fast_config();
    config.request_timeout_ms = 100;
    let p = pair(config).await;

    let response = p
        .asker
        .request("peer".into(), RequestKind::Status, JsonValue::Null)
        .await
        .unwrap();
    assert_eq!(response.payload["agent"], "peer");

    p.bus.black_hole(&"peer".into());
    let started = Instant::now();
    let err = p
        .asker
        .request("peer".into(), RequestKind::Status, JsonValue::Null)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(p.asker.pending_count(), 0);
}

#[tokio::test]
async fn test_notification_gets_no_reply() {
    let bus = Arc::new(InMemoryBus::default());
    let (_shutdown, rx) = watch::channel(false);
    let asker = A2aCoordinator::new("asker".into(), bus.clone(), HandlerRegistry::new(), fast_config());
    let peer = A2aCoordinator::new(
        "peer".into(),
        bus.clone(),
        HandlerRegistry::new().with("peer", RequestKind::MatchFound, Handler::MatchFound),
        fast_config(),
    );
    let mut asker_inbox = bus.subscribe(&"asker".into()).await.unwrap();
    peer.listen(&"peer".into(), rx, None).await.unwrap();

    let notice = json!({
        "run_id": uuid::Uuid::new_v4(),
        "requester_id": "candidate:1",
        "target": "job",
        "entity_ids": ["job:1"],
        "top_score": 0.9,
    });
    asker
        .notify("peer".into(), RequestKind::MatchFound, notice)
        .await
        .unwrap();
    assert_eq!(asker.pending_count(), 0);

    let deadline = Instant::now() + Duration::from_secs(2);
    while peer.registry().stats_for(&"peer".into())[0].execution_count == 0 {
        assert!(Instant::now() < deadline, "notice never handled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stats = peer.registry().stats_for(&"peer".into());
    assert_eq!(stats[0].error_count, 0);

    let reply = tokio::time::timeout(Duration::from_millis(100), asker_inbox.recv()).await;
    assert!(reply.is_err(), "unexpected reply to a notification");
}

#[tokio::test]
async fn test_malformed_frames_rejected() {
    let p = pair(fast_config()).await;

    assert!(matches!(
        p.peer.handle_frame(b"not json").await,
        Disposition::Rejected(MalformedMessage::InvalidJson(_))
    ));

    let mut envelope = Envelope::ingest(EntityKind::Job, IngestOp::Created, "x", json!({"id": 1}));
    envelope.event_type = "a2a.gossip".into();
    let frame = envelope.encode().unwrap();
    assert_eq!(
        p.peer.handle_frame(&frame).await,
        Disposition::Rejected(MalformedMessage::UnknownEventType("a2a.gossip".into()))
    );
}

#[tokio::test]
async fn test_ingest_events_forwarded() {
    let p = pair(fast_config()).await;
    let envelope = Envelope::ingest(EntityKind::Candidate, IngestOp::Updated, "crm", json!({"id": 7}));
    let frame = envelope.encode().unwrap();

    match p.peer.handle_frame(&frame).await {
        Disposition::Forward(forwarded) => assert_eq!(*forwarded, envelope),
        other => panic!("expected forward, got {:?}", other),
    }
}
