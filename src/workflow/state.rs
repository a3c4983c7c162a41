//! Workflow states.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::ranking::RequirementProfile;
use crate::types::{MatchCandidate, MatchRequest, MatchResponse};

/// State of one workflow execution. Each variant carries everything the
/// next step needs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Start {
        request: MatchRequest,
    },
    ProfileAnalyzed {
        request: MatchRequest,
        profile: RequirementProfile,
        query_vector: Vec<f32>,
    },
    CandidatesFound {
        request: MatchRequest,
        profile: RequirementProfile,
        raw_matches: Vec<MatchCandidate>,
    },
    Ranked {
        request: MatchRequest,
        profile: RequirementProfile,
        ranked: Vec<MatchCandidate>,
    },
    Completed(MatchResponse),
    Failed(WorkflowFailure),
}

impl WorkflowState {
    pub fn kind(&self) -> StateKind {
        match self {
            WorkflowState::Start { .. } => StateKind::Start,
            WorkflowState::ProfileAnalyzed { .. } => StateKind::ProfileAnalyzed,
            WorkflowState::CandidatesFound { .. } => StateKind::CandidatesFound,
            WorkflowState::Ranked { .. } => StateKind::Ranked,
            WorkflowState::Completed(_) => StateKind::Completed,
            WorkflowState::Failed(_) => StateKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed(_) | WorkflowState::Failed(_))
    }
}

/// State discriminant, recorded per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Start,
    ProfileAnalyzed,
    CandidatesFound,
    Ranked,
    Completed,
    Failed,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Start => "start",
            StateKind::ProfileAnalyzed => "profile_analyzed",
            StateKind::CandidatesFound => "candidates_found",
            StateKind::Ranked => "ranked",
            StateKind::Completed => "completed",
            StateKind::Failed => "failed",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a workflow failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    InvalidRequest,
    EmbeddingFailed,
    IndexUnavailable,
    SearchFailed,
    RankingFailed,
}

impl FailureReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::InvalidRequest => "INVALID_REQUEST",
            FailureReason::EmbeddingFailed => "EMBEDDING_FAILED",
            FailureReason::IndexUnavailable => "INDEX_UNAVAILABLE",
            FailureReason::SearchFailed => "SEARCH_FAILED",
            FailureReason::RankingFailed => "RANKING_FAILED",
        }
    }
}

/// Terminal failure of a workflow run.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{} during {step}: {detail}", reason.code())]
pub struct WorkflowFailure {
    pub reason: FailureReason,
    /// State the failing step started from
    pub step: StateKind,
    pub detail: String,
}

impl WorkflowFailure {
    pub fn new(reason: FailureReason, step: StateKind, detail: impl Into<String>) -> Self {
        Self {
            reason,
            step,
            detail: detail.into(),
        }
    }
}
