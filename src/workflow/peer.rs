//! Peer cross-validation of recommendations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::a2a::{A2aCoordinator, A2aError, AgentId, RequestKind};
use crate::ranking::{attribute_skills, attribute_years, ExperienceBand, RequirementProfile};
use crate::types::MatchCandidate;

/// Years outside a band at which experience fit reaches zero.
const EXPERIENCE_FALLOFF_YEARS: f32 = 5.0;

/// Recommendations sent to a peer for validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub requester_id: String,
    pub profile: RequirementProfile,
    pub recommendations: Vec<MatchCandidate>,
}

/// Peer's judgement of one recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub entity_id: String,
    pub confirmed: bool,
    pub skill_coverage: f32,
    pub experience_fit: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub verdicts: Vec<ValidationVerdict>,
}

impl ValidationReport {
    pub fn confirmed(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .filter(|v| v.confirmed)
            .map(|v| v.entity_id.clone())
            .collect()
    }

    pub fn rejected(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .filter(|v| !v.confirmed)
            .map(|v| v.entity_id.clone())
            .collect()
    }
}

/// Agent asked to cross-validate recommendations during summarize.
#[async_trait]
pub trait PeerDelegate: Send + Sync {
    fn peer(&self) -> &AgentId;

    async fn validate(&self, request: ValidationRequest) -> Result<ValidationReport, A2aError>;
}

/// Peer reached through the A2A coordinator.
pub struct CoordinatorPeer {
    coordinator: Arc<A2aCoordinator>,
    peer: AgentId,
    timeout: Duration,
}

impl CoordinatorPeer {
    pub fn new(coordinator: Arc<A2aCoordinator>, peer: AgentId, timeout: Duration) -> Self {
        Self {
            coordinator,
            peer,
            timeout,
        }
    }
}

#[async_trait]
impl PeerDelegate for CoordinatorPeer {
    fn peer(&self) -> &AgentId {
        &self.peer
    }

    async fn validate(&self, request: ValidationRequest) -> Result<ValidationReport, A2aError> {
        let payload =
            serde_json::to_value(&request).map_err(|e| A2aError::InvalidPayload(e.to_string()))?;
        let response = self
            .coordinator
            .send_request(
                self.peer.clone(),
                RequestKind::ValidateMatch,
                payload,
                self.timeout,
            )
            .await?;
        serde_json::from_value(response.payload).map_err(|e| A2aError::InvalidPayload(e.to_string()))
    }
}

/// Judges recommendations by skill coverage and experience fit.
#[derive(Debug, Clone)]
pub struct MatchValidator {
    min_skill_coverage: f32,
    min_experience_fit: f32,
}

impl Default for MatchValidator {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl MatchValidator {
    pub fn new(min_skill_coverage: f32) -> Self {
        Self {
            min_skill_coverage,
            min_experience_fit: 0.5,
        }
    }

    /// Check each recommendation against the validator's own view of the requester.
    pub fn validate(&self, request: &ValidationRequest) -> ValidationReport {
        let verdicts = request
            .recommendations
            .iter()
            .map(|candidate| {
                let skill_coverage = skill_coverage(&request.profile, candidate);
                let experience_fit = experience_fit(&request.profile, candidate);
                ValidationVerdict {
                    entity_id: candidate.entity_id.clone(),
                    confirmed: skill_coverage >= self.min_skill_coverage
                        && experience_fit >= self.min_experience_fit,
                    skill_coverage,
                    experience_fit,
                }
            })
            .collect();
        ValidationReport { verdicts }
    }
}

/// Share of the entity's listed skills the requester has. Neutral (1.0)
/// when either side lists none.
fn skill_coverage(profile: &RequirementProfile, candidate: &MatchCandidate) -> f32 {
    let listed = attribute_skills(&candidate.attributes);
    if listed.is_empty() || profile.skills.is_empty() {
        return 1.0;
    }
    let covered = listed.iter().filter(|s| profile.skills.contains(s)).count();
    covered as f32 / listed.len() as f32
}

/// 1.0 inside the band, falling linearly to 0 five years outside it.
/// Neutral when experience is unknown on either side.
fn experience_fit(profile: &RequirementProfile, candidate: &MatchCandidate) -> f32 {
    let pair = match (profile.experience_years, ExperienceBand::from_attributes(&candidate.attributes)) {
        (Some(years), Some(band)) => Some((years, band)),
        _ => match (profile.experience_band, attribute_years(&candidate.attributes)) {
            (Some(band), Some(years)) => Some((years, band)),
            _ => None,
        },
    };
    let Some((years, band)) = pair else {
        return 1.0;
    };

    let distance = if years < band.min {
        band.min - years
    } else if years > band.max {
        years - band.max
    } else {
        0.0
    };
    (1.0 - distance / EXPERIENCE_FALLOFF_YEARS).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: &str, attrs: serde_json::Value) -> MatchCandidate {
        MatchCandidate::from_similarity(id, 0.8, attrs.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_validator_verdicts() {
        let validator = MatchValidator::default();
        let request = ValidationRequest {
            requester_id: "candidate:1".into(),
            profile: RequirementProfile::new("x")
                .with_skills(["go", "kubernetes"])
                .with_experience_years(6.0),
            recommendations: vec![
                job("job:1", json!({"skills": ["go", "kubernetes", "terraform"], "experience_level": "senior"})),
                job("job:2", json!({"skills": ["java", "spring"], "experience_level": "senior"})),
                job("job:3", json!({"skills": ["go"], "experience_level": "principal"})),
                job("job:4", json!({})),
            ],
        };

        let report = validator.validate(&request);
        assert_eq!(report.confirmed(), vec!["job:1", "job:4"]);
        assert_eq!(report.rejected(), vec!["job:2", "job:3"]);

        let principal = &report.verdicts[2];
        assert!((principal.experience_fit - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_experience_fit_falloff() {
        let profile = RequirementProfile::new("x").with_experience_years(10.0);
        let fit = experience_fit(&profile, &job("job:1", json!({"experience_level": "senior"})));
        assert!((fit - 0.6).abs() < 1e-6);
    }
}
