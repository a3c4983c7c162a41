//! Matching domain types shared across the node.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

use crate::a2a::AgentId;

/// Kind of record stored in the similarity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Job,
    Candidate,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::Candidate => "candidate",
        }
    }

    /// Index entity id for a record id (`job:42`).
    pub fn entity_id(&self, record_id: &str) -> String {
        format!("{}:{}", self.as_str(), record_id)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Finds jobs for a job seeker
    JobFinder,
    /// Finds candidates for an employer
    CandidateFinder,
}

impl AgentRole {
    /// Entity kind this role searches for.
    pub fn target(&self) -> EntityKind {
        match self {
            AgentRole::JobFinder => EntityKind::Job,
            AgentRole::CandidateFinder => EntityKind::Candidate,
        }
    }

    pub fn default_agent_id(&self) -> &'static str {
        match self {
            AgentRole::JobFinder => "job_finder_agent",
            AgentRole::CandidateFinder => "candidate_finder_agent",
        }
    }

    /// The opposite role, asked for cross-validation.
    pub fn counterpart(&self) -> AgentRole {
        match self {
            AgentRole::JobFinder => AgentRole::CandidateFinder,
            AgentRole::CandidateFinder => AgentRole::JobFinder,
        }
    }

    pub fn default_peer_id(&self) -> &'static str {
        self.counterpart().default_agent_id()
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "job_finder" => Ok(AgentRole::JobFinder),
            "candidate_finder" => Ok(AgentRole::CandidateFinder),
            other => Err(format!("unknown agent role '{}'", other)),
        }
    }
}

/// Structured filters supplied alongside the free-text message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredPreferences {
    pub skills: Vec<String>,
    pub location: Option<String>,
    pub experience_years: Option<f32>,
    /// Level name (junior, mid, senior, lead, principal)
    pub experience_level: Option<String>,
    pub remote_ok: Option<bool>,
}

/// Inbound matching request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub requester_id: String,
    pub free_text_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_preferences: Option<StructuredPreferences>,
}

impl MatchRequest {
    pub fn new(requester_id: impl Into<String>, free_text_message: impl Into<String>) -> Self {
        Self {
            requester_id: requester_id.into(),
            free_text_message: free_text_message.into(),
            structured_preferences: None,
        }
    }

    pub fn with_preferences(mut self, preferences: StructuredPreferences) -> Self {
        self.structured_preferences = Some(preferences);
        self
    }
}

/// One ranked recommendation.
///
/// Created from a search hit, scored once by the ranking engine and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub entity_id: String,
    /// Similarity clamped into [0, 1]
    pub raw_vector_score: f32,
    /// Score after bonuses and penalties, in [0, 1]
    pub adjusted_score: f32,
    pub rationale: String,
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
}

impl MatchCandidate {
    /// Unranked candidate from a similarity hit.
    pub fn from_similarity(
        entity_id: impl Into<String>,
        similarity: f32,
        attributes: Map<String, JsonValue>,
    ) -> Self {
        let raw = if similarity.is_nan() {
            similarity
        } else {
            similarity.clamp(0.0, 1.0)
        };
        Self {
            entity_id: entity_id.into(),
            raw_vector_score: raw,
            adjusted_score: raw,
            rationale: String::new(),
            attributes,
        }
    }
}

/// Result of asking the peer agent to cross-validate recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerValidation {
    /// Peer answered
    Validated {
        peer: AgentId,
        confirmed: Vec<String>,
        rejected: Vec<String>,
    },
    /// Peer timed out or was unreachable
    Degraded { peer: AgentId, reason: String },
    /// No peer configured or nothing to validate
    Skipped,
}

/// Terminal workflow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub recommendations: Vec<MatchCandidate>,
    pub reasoning: String,
    pub next_steps: Vec<String>,
    pub peer_validation: PeerValidation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_targets() {
        assert_eq!(AgentRole::JobFinder.target(), EntityKind::Job);
        assert_eq!(AgentRole::CandidateFinder.target(), EntityKind::Candidate);
        assert_eq!(AgentRole::JobFinder.default_peer_id(), "candidate_finder_agent");
        assert_eq!("candidate-finder".parse::<AgentRole>(), Ok(AgentRole::CandidateFinder));
    }

    #[test]
    fn test_raw_score_clamped() {
        let c = MatchCandidate::from_similarity("job:1", -0.4, Map::new());
        assert_eq!(c.raw_vector_score, 0.0);
        let c = MatchCandidate::from_similarity("job:2", 1.0000001, Map::new());
        assert_eq!(c.raw_vector_score, 1.0);
    }

    #[test]
    fn test_request_without_preferences() {
        let req: MatchRequest =
            serde_json::from_str(r#"{"requester_id":"u1","free_text_message":"rust jobs"}"#).unwrap();
        assert!(req.structured_preferences.is_none());
    }

    #[test]
    fn test_peer_validation_tagged() {
        let json = serde_json::to_value(PeerValidation::Skipped).unwrap();
        assert_eq!(json["status"], "skipped");
    }
}
