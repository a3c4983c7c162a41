//! Notices sent after a run completes with recommendations.
//!
//! The peer agent gets a one-way `match_found` request naming the matched
//! entities. Job matches additionally become `application.recommended`
//! records, one per job, published to the applications inbox. Both are
//! best effort: failures are logged and never change the match response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::WorkflowRun;
use crate::a2a::{A2aCoordinator, AgentId, RequestKind};
use crate::config::FollowUpConfig;
use crate::network::Envelope;
use crate::types::{AgentRole, EntityKind, MatchCandidate, MatchResponse};

/// Application status carried by every published record.
pub const STATUS_RECOMMENDED: &str = "recommended";

/// Payload of a `match_found` notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFound {
    pub run_id: Uuid,
    pub requester_id: String,
    /// Kind of the matched entities
    pub target: EntityKind,
    pub entity_ids: Vec<String>,
    pub top_score: f32,
}

/// A recommended job application for the requesting candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: String,
    pub candidate_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub remote_friendly: bool,
    pub match_score: f32,
    pub status: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ApplicationRecord {
    fn from_recommendation(run_id: Uuid, candidate_id: &str, job: &MatchCandidate) -> Self {
        let text = |key: &str| {
            job.attributes
                .get(key)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };
        Self {
            application_id: format!("app_{}_{}", run_id.simple(), job.entity_id),
            candidate_id: candidate_id.to_string(),
            job_id: job.entity_id.clone(),
            job_title: text("title"),
            company: text("company"),
            location: text("location"),
            remote_friendly: job
                .attributes
                .get("remote_friendly")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            match_score: job.adjusted_score,
            status: STATUS_RECOMMENDED.to_string(),
            run_id,
            created_at: Utc::now(),
        }
    }
}

/// Application records for a job finder run, in recommendation order.
pub fn application_records(
    run_id: Uuid,
    candidate_id: &str,
    response: &MatchResponse,
) -> Vec<ApplicationRecord> {
    response
        .recommendations
        .iter()
        .map(|job| ApplicationRecord::from_recommendation(run_id, candidate_id, job))
        .collect()
}

/// What a follow-up actually sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowUpReport {
    pub notified: bool,
    pub applications: usize,
}

/// Sends the notices for one completed run through the coordinator.
pub struct FollowUp {
    coordinator: Arc<A2aCoordinator>,
    settings: FollowUpConfig,
    role: AgentRole,
    peer: Option<AgentId>,
}

impl FollowUp {
    pub fn new(
        coordinator: Arc<A2aCoordinator>,
        settings: FollowUpConfig,
        role: AgentRole,
        peer: Option<AgentId>,
    ) -> Self {
        Self {
            coordinator,
            settings,
            role,
            peer,
        }
    }

    /// Run in the background when `run` completed with recommendations.
    pub fn spawn(self, run: &WorkflowRun, requester_id: String) -> Option<JoinHandle<FollowUpReport>> {
        let response = match &run.outcome {
            Ok(response) if !response.recommendations.is_empty() => response.clone(),
            _ => return None,
        };
        let run_id = run.run_id;
        Some(tokio::spawn(async move {
            self.run(run_id, &requester_id, &response).await
        }))
    }

    /// Send the notices for `response` now. Returns what was delivered.
    pub async fn run(&self, run_id: Uuid, requester_id: &str, response: &MatchResponse) -> FollowUpReport {
        let mut report = FollowUpReport::default();
        if response.recommendations.is_empty() {
            return report;
        }

        if let (true, Some(peer)) = (self.settings.notify_peer, &self.peer) {
            let notice = MatchFound {
                run_id,
                requester_id: requester_id.to_string(),
                target: self.role.target(),
                entity_ids: response
                    .recommendations
                    .iter()
                    .map(|c| c.entity_id.clone())
                    .collect(),
                top_score: response.recommendations[0].adjusted_score,
            };
            report.notified = self.notify(peer, &notice).await;
        }

        if self.settings.publish_applications && self.role == AgentRole::JobFinder {
            let inbox = AgentId::new(self.settings.applications_inbox.clone());
            for record in application_records(run_id, requester_id, response) {
                if self.publish(&inbox, &record).await {
                    report.applications += 1;
                }
            }
        }

        info!(
            run_id = %run_id,
            notified = report.notified,
            applications = report.applications,
            "Match follow-up sent"
        );
        report
    }

    async fn notify(&self, peer: &AgentId, notice: &MatchFound) -> bool {
        let payload = match serde_json::to_value(notice) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Could not encode match_found notice");
                return false;
            }
        };
        match self
            .coordinator
            .notify(peer.clone(), RequestKind::MatchFound, payload)
            .await
        {
            Ok(id) => {
                debug!(peer = %peer, correlation_id = %id, "match_found sent");
                true
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "match_found notice not delivered");
                false
            }
        }
    }

    async fn publish(&self, inbox: &AgentId, record: &ApplicationRecord) -> bool {
        let data = match serde_json::to_value(record) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Could not encode application record");
                return false;
            }
        };
        let envelope = Envelope::application(self.coordinator.agent_id(), data);
        match self.coordinator.publish_event(inbox, &envelope).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    application_id = %record.application_id,
                    error = %e,
                    "Application recommendation not published"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::HandlerRegistry;
    use crate::config::CoordinatorConfig;
    use crate::network::{EventKind, InMemoryBus, Transport};
    use crate::types::PeerValidation;
    use serde_json::{json, Map};
    use std::time::Duration;

    fn response() -> MatchResponse {
        let attrs = json!({"title": "Go engineer", "company": "Acme", "location": "Berlin", "remote_friendly": true});
        let mut top = MatchCandidate::from_similarity("job:1", 0.9, attrs.as_object().cloned().unwrap());
        top.adjusted_score = 0.95;
        MatchResponse {
            recommendations: vec![top, MatchCandidate::from_similarity("job:2", 0.4, Map::new())],
            reasoning: String::new(),
            next_steps: Vec::new(),
            peer_validation: PeerValidation::Skipped,
        }
    }

    #[test]
    fn test_application_records() {
        let run_id = Uuid::new_v4();
        let records = application_records(run_id, "candidate:7", &response());

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.candidate_id, "candidate:7");
        assert_eq!(first.job_id, "job:1");
        assert_eq!(first.job_title.as_deref(), Some("Go engineer"));
        assert_eq!(first.company.as_deref(), Some("Acme"));
        assert!(first.remote_friendly);
        assert_eq!(first.match_score, 0.95);
        assert_eq!(first.status, STATUS_RECOMMENDED);
        assert!(first.application_id.ends_with("_job:1"));
        assert_eq!(records[1].job_title, None);
    }

    #[tokio::test]
    async fn test_run_sends_notice_and_applications() {
        let bus = Arc::new(InMemoryBus::default());
        let mut peer_inbox = bus.subscribe(&AgentId::new("peer")).await.unwrap();
        let mut tracker = bus.subscribe(&AgentId::new("application_tracker")).await.unwrap();
        let coordinator = A2aCoordinator::new(
            "job_finder_agent".into(),
            bus.clone(),
            HandlerRegistry::new(),
            CoordinatorConfig::default(),
        );

        let follow_up = FollowUp::new(
            coordinator.clone(),
            FollowUpConfig::default(),
            AgentRole::JobFinder,
            Some("peer".into()),
        );
        let report = follow_up.run(Uuid::new_v4(), "candidate:7", &response()).await;
        assert_eq!(report, FollowUpReport { notified: true, applications: 2 });
        assert_eq!(coordinator.pending_count(), 0);

        let frame = tokio::time::timeout(Duration::from_secs(1), peer_inbox.recv())
            .await
            .unwrap()
            .unwrap();
        let notice = Envelope::decode(&frame).unwrap().into_message().unwrap();
        assert_eq!(notice.request_type, RequestKind::MatchFound);
        let notice: MatchFound = serde_json::from_value(notice.payload).unwrap();
        assert_eq!(notice.entity_ids, vec!["job:1", "job:2"]);
        assert_eq!(notice.target, EntityKind::Job);

        let frame = tokio::time::timeout(Duration::from_secs(1), tracker.recv())
            .await
            .unwrap()
            .unwrap();
        let envelope = Envelope::decode(&frame).unwrap();
        assert_eq!(envelope.kind().unwrap(), EventKind::Application);
        assert_eq!(envelope.data["job_id"], "job:1");
    }

    #[tokio::test]
    async fn test_candidate_finder_publishes_no_applications() {
        let bus = Arc::new(InMemoryBus::default());
        let coordinator = A2aCoordinator::new(
            "candidate_finder_agent".into(),
            bus.clone(),
            HandlerRegistry::new(),
            CoordinatorConfig::default(),
        );
        let follow_up = FollowUp::new(coordinator, FollowUpConfig::default(), AgentRole::CandidateFinder, None);

        let report = follow_up.run(Uuid::new_v4(), "job:3", &response()).await;
        assert_eq!(report, FollowUpReport::default());
        assert_eq!(bus.published_count(), 0);
    }
}
