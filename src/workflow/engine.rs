//! Workflow driver.

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::analyze::ProfileAnalyzer;
use super::peer::{PeerDelegate, ValidationRequest};
use super::state::{FailureReason, StateKind, WorkflowFailure, WorkflowState};
use crate::config::WorkflowConfig;
use crate::ranking::{RankingEngine, RequirementProfile};
use crate::search::{Embedder, IndexError, MetadataFilter, SearchHit, SimilarityIndex};
use crate::types::{
    AgentRole, EntityKind, MatchCandidate, MatchRequest, MatchResponse, PeerValidation,
};

/// Record of one workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    /// Every state entered, starting with `Start`
    pub transitions: Vec<StateKind>,
    pub outcome: Result<MatchResponse, WorkflowFailure>,
    pub duration: Duration,
}

impl WorkflowRun {
    pub fn reached(&self, kind: StateKind) -> bool {
        self.transitions.contains(&kind)
    }
}

/// Runs the analyze, search, rank, summarize sequence for one request.
///
/// Each call to [`execute`](Self::execute) owns its state; runs share only
/// the embedder and the index.
pub struct WorkflowEngine {
    role: AgentRole,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    ranking: RankingEngine,
    analyzer: ProfileAnalyzer,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(
        role: AgentRole,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        ranking: RankingEngine,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            role,
            embedder,
            index,
            ranking,
            analyzer: ProfileAnalyzer::new(),
            config,
        }
    }

    /// Role whose targets this engine searches
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Workflow settings, including the follow-up section
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Deadline for a peer validation round trip.
    pub fn peer_timeout(&self) -> Duration {
        self.config.peer_validation.timeout()
    }

    /// Drive a request to a terminal state.
    pub async fn execute(
        &self,
        request: MatchRequest,
        peer: Option<&dyn PeerDelegate>,
    ) -> WorkflowRun {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(run_id = %run_id, requester = %request.requester_id, role = ?self.role, "Workflow started");

        let mut state = WorkflowState::Start { request };
        let mut transitions = vec![StateKind::Start];

        let outcome = loop {
            state = match state {
                WorkflowState::Completed(response) => break Ok(response),
                WorkflowState::Failed(failure) => break Err(failure),
                active => self.step(active, peer).await,
            };
            debug!(run_id = %run_id, state = %state.kind(), "Workflow transition");
            transitions.push(state.kind());
        };

        let duration = started.elapsed();
        let label = if outcome.is_ok() { "completed" } else { "failed" };
        counter!("workflow_runs_total", "outcome" => label).increment(1);
        histogram!("workflow_duration_seconds").record(duration.as_secs_f64());

        match &outcome {
            Ok(response) => info!(
                run_id = %run_id,
                recommendations = response.recommendations.len(),
                duration_ms = duration.as_millis() as u64,
                "Workflow completed"
            ),
            Err(failure) => warn!(
                run_id = %run_id,
                reason = failure.reason.code(),
                step = %failure.step,
                detail = %failure.detail,
                "Workflow failed"
            ),
        }

        WorkflowRun {
            run_id,
            transitions,
            outcome,
            duration,
        }
    }

    /// Advance one step. Terminal states are returned unchanged.
    pub async fn step(&self, state: WorkflowState, peer: Option<&dyn PeerDelegate>) -> WorkflowState {
        match state {
            WorkflowState::Start { request } => self.analyze(request).await,
            WorkflowState::ProfileAnalyzed {
                request,
                profile,
                query_vector,
            } => self.search(request, profile, query_vector).await,
            WorkflowState::CandidatesFound {
                request,
                profile,
                raw_matches,
            } => self.rank(request, profile, raw_matches),
            WorkflowState::Ranked {
                request,
                profile,
                ranked,
            } => self.summarize(request, profile, ranked, peer).await,
            terminal => terminal,
        }
    }

    async fn analyze(&self, request: MatchRequest) -> WorkflowState {
        let profile = match self.analyzer.analyze(&request) {
            Ok(profile) => profile,
            Err(detail) => {
                return failed(FailureReason::InvalidRequest, StateKind::Start, detail);
            }
        };

        match self.embedder.embed(&profile.search_text).await {
            Ok(query_vector) => WorkflowState::ProfileAnalyzed {
                request,
                profile,
                query_vector,
            },
            Err(e) => failed(FailureReason::EmbeddingFailed, StateKind::Start, e.to_string()),
        }
    }

    async fn search(
        &self,
        request: MatchRequest,
        profile: RequirementProfile,
        query_vector: Vec<f32>,
    ) -> WorkflowState {
        let target = self.role.target();
        let mut filter = MetadataFilter::new().eq("kind", target.as_str());
        if target == EntityKind::Job && profile.remote_ok == Some(true) {
            filter = filter.eq("remote_friendly", true);
        }
        // One extra slot in case the requester's own entry comes back.
        let k = self.config.candidate_pool + 1;

        let hits = match self.index.query(&query_vector, k, Some(&filter)).await {
            Ok(hits) => Ok(hits),
            Err(IndexError::Unavailable(reason)) => {
                warn!(reason = %reason, "Index unavailable, retrying once");
                tokio::time::sleep(self.config.search_retry_backoff()).await;
                self.index.query(&query_vector, k, Some(&filter)).await
            }
            Err(e) => Err(e),
        };

        match hits {
            Ok(hits) => WorkflowState::CandidatesFound {
                raw_matches: self.to_candidates(&request, hits),
                request,
                profile,
            },
            Err(IndexError::Unavailable(reason)) => failed(
                FailureReason::IndexUnavailable,
                StateKind::ProfileAnalyzed,
                reason,
            ),
            Err(e) => failed(
                FailureReason::SearchFailed,
                StateKind::ProfileAnalyzed,
                e.to_string(),
            ),
        }
    }

    fn to_candidates(&self, request: &MatchRequest, hits: Vec<SearchHit>) -> Vec<MatchCandidate> {
        hits.into_iter()
            .filter(|hit| hit.entity_id != request.requester_id)
            .take(self.config.candidate_pool)
            .map(|hit| MatchCandidate::from_similarity(hit.entity_id, hit.similarity, hit.metadata))
            .collect()
    }

    fn rank(
        &self,
        request: MatchRequest,
        profile: RequirementProfile,
        raw_matches: Vec<MatchCandidate>,
    ) -> WorkflowState {
        match self.ranking.rank(&profile, raw_matches) {
            Ok(mut ranked) => {
                ranked.retain(|c| c.adjusted_score >= self.config.min_score);
                ranked.truncate(self.config.max_recommendations);
                WorkflowState::Ranked {
                    request,
                    profile,
                    ranked,
                }
            }
            Err(e) => {
                error!(error = %e, "Ranking rejected its input");
                failed(
                    FailureReason::RankingFailed,
                    StateKind::CandidatesFound,
                    e.to_string(),
                )
            }
        }
    }

    async fn summarize(
        &self,
        request: MatchRequest,
        profile: RequirementProfile,
        ranked: Vec<MatchCandidate>,
        peer: Option<&dyn PeerDelegate>,
    ) -> WorkflowState {
        let settings = &self.config.peer_validation;
        let peer_validation = match peer {
            Some(peer) if settings.enabled && !ranked.is_empty() => {
                let validation = ValidationRequest {
                    requester_id: request.requester_id.clone(),
                    profile: profile.clone(),
                    recommendations: ranked.iter().take(settings.top_n).cloned().collect(),
                };
                match peer.validate(validation).await {
                    Ok(report) => PeerValidation::Validated {
                        peer: peer.peer().clone(),
                        confirmed: report.confirmed(),
                        rejected: report.rejected(),
                    },
                    Err(e) => {
                        warn!(peer = %peer.peer(), error = %e, "Peer validation unavailable, degrading");
                        PeerValidation::Degraded {
                            peer: peer.peer().clone(),
                            reason: e.to_string(),
                        }
                    }
                }
            }
            _ => PeerValidation::Skipped,
        };

        let reasoning = self.reasoning(&profile, &ranked, &peer_validation);
        let next_steps = self.next_steps(&ranked, &peer_validation);
        WorkflowState::Completed(MatchResponse {
            recommendations: ranked,
            reasoning,
            next_steps,
            peer_validation,
        })
    }

    fn reasoning(
        &self,
        profile: &RequirementProfile,
        ranked: &[MatchCandidate],
        peer_validation: &PeerValidation,
    ) -> String {
        let noun = plural(self.role.target());
        let mut criteria = Vec::new();
        if !profile.skills.is_empty() {
            criteria.push(format!("skills: {}", profile.skills.join(", ")));
        }
        if let Some(location) = &profile.location {
            criteria.push(format!("location: {}", location));
        }
        if let Some(years) = profile.experience_years {
            criteria.push(format!("experience: {} years", years));
        }

        let mut parts = Vec::new();
        match ranked.first() {
            None => parts.push(format!("No matching {} found.", noun)),
            Some(top) => {
                let mut summary = format!("Found {} matching {}", ranked.len(), noun);
                if !criteria.is_empty() {
                    summary.push_str(&format!(" ({})", criteria.join("; ")));
                }
                summary.push_str(&format!(
                    ". Top match {} scored {:.2}: {}.",
                    top.entity_id, top.adjusted_score, top.rationale
                ));
                parts.push(summary);
            }
        }

        match peer_validation {
            PeerValidation::Validated {
                peer,
                confirmed,
                rejected,
            } => parts.push(format!(
                "Peer {} confirmed {} of {} reviewed recommendations.",
                peer,
                confirmed.len(),
                confirmed.len() + rejected.len()
            )),
            PeerValidation::Degraded { peer, reason } => parts.push(format!(
                "Recommendations without peer validation: {} did not respond ({}).",
                peer, reason
            )),
            PeerValidation::Skipped => {}
        }

        parts.join(" ")
    }

    fn next_steps(&self, ranked: &[MatchCandidate], peer_validation: &PeerValidation) -> Vec<String> {
        let mut steps = Vec::new();
        match (ranked.first(), self.role) {
            (None, _) => {
                steps.push("Broaden the search: add skills or relax the location".to_string());
                steps.push(format!("Check back later as new {} are added", plural(self.role.target())));
            }
            (Some(top), AgentRole::JobFinder) => {
                steps.push("Review the recommended jobs".to_string());
                steps.push(format!("Apply to {}", top.entity_id));
            }
            (Some(top), AgentRole::CandidateFinder) => {
                steps.push("Review the recommended candidate profiles".to_string());
                steps.push(format!("Contact {}", top.entity_id));
            }
        }
        if matches!(peer_validation, PeerValidation::Degraded { .. }) {
            steps.push("Retry peer validation later".to_string());
        }
        steps
    }
}

fn plural(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Job => "jobs",
        EntityKind::Candidate => "candidates",
    }
}

fn failed(reason: FailureReason, step: StateKind, detail: impl Into<String>) -> WorkflowState {
    WorkflowState::Failed(WorkflowFailure::new(reason, step, detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{HashingEmbedder, IndexEntry, InMemoryIndex};

    async fn engine_with_jobs() -> WorkflowEngine {
        let embedder = Arc::new(HashingEmbedder::default());
        let index = Arc::new(InMemoryIndex::new(crate::search::EMBEDDING_DIM));
        for (id, text, skills, location) in [
            ("1", "Go Kubernetes backend engineer", vec!["go", "kubernetes"], "Berlin"),
            ("2", "Frontend React developer", vec!["react"], "Paris"),
        ] {
            let vector = embedder.embed(text).await.unwrap();
            index
                .upsert(
                    IndexEntry::new(EntityKind::Job.entity_id(id), vector)
                        .with_metadata("kind", "job")
                        .with_metadata("skills", skills)
                        .with_metadata("location", location),
                )
                .await
                .unwrap();
        }
        WorkflowEngine::new(
            AgentRole::JobFinder,
            embedder,
            index,
            RankingEngine::default(),
            WorkflowConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_step_by_step() {
        let engine = engine_with_jobs().await;
        let request = MatchRequest::new("candidate:1", "Go and Kubernetes backend work in Berlin");

        let state = engine.step(WorkflowState::Start { request }, None).await;
        assert_eq!(state.kind(), StateKind::ProfileAnalyzed);
        let state = engine.step(state, None).await;
        assert_eq!(state.kind(), StateKind::CandidatesFound);
        let state = engine.step(state, None).await;
        assert_eq!(state.kind(), StateKind::Ranked);
        let state = engine.step(state, None).await;
        assert_eq!(state.kind(), StateKind::Completed);

        let again = engine.step(state.clone(), None).await;
        assert_eq!(again, state);
    }

    #[tokio::test]
    async fn test_completed_run() {
        let engine = engine_with_jobs().await;
        let run = engine
            .execute(MatchRequest::new("candidate:1", "Go Kubernetes backend engineer"), None)
            .await;

        assert_eq!(
            run.transitions,
            vec![
                StateKind::Start,
                StateKind::ProfileAnalyzed,
                StateKind::CandidatesFound,
                StateKind::Ranked,
                StateKind::Completed
            ]
        );
        let response = run.outcome.unwrap();
        assert_eq!(response.recommendations[0].entity_id, "job:1");
        assert_eq!(response.peer_validation, PeerValidation::Skipped);
        assert!(response.next_steps.contains(&"Apply to job:1".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_request_fails() {
        let engine = engine_with_jobs().await;
        let run = engine.execute(MatchRequest::new("candidate:1", "  "), None).await;
        let failure = run.outcome.unwrap_err();
        assert_eq!(failure.reason, FailureReason::InvalidRequest);
        assert_eq!(run.transitions, vec![StateKind::Start, StateKind::Failed]);
    }
}
