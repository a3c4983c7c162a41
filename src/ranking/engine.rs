//! Rule-based re-ranking of similarity hits.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

use super::profile::{attribute_skills, attribute_years, normalize, ExperienceBand, RequirementProfile};
use crate::types::MatchCandidate;

/// Adjustment weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    /// Bonus per overlapping required skill
    pub skill_bonus: f32,
    /// Cap on the total skill bonus
    pub skill_bonus_cap: f32,
    /// Bonus for an exact location match
    pub location_bonus: f32,
    /// Penalty when experience falls outside the requested band
    pub experience_penalty: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            skill_bonus: 0.05,
            skill_bonus_cap: 0.2,
            location_bonus: 0.05,
            experience_penalty: 0.1,
        }
    }
}

impl RankingWeights {
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("skill_bonus", self.skill_bonus),
            ("skill_bonus_cap", self.skill_bonus_cap),
            ("location_bonus", self.location_bonus),
            ("experience_penalty", self.experience_penalty),
        ];
        for (name, value) in all {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(format!("ranking.{} must be within [0, 1]", name));
            }
        }
        Ok(())
    }
}

/// Input the ranking engine refuses to score.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RankingError {
    #[error("non-finite similarity for {0}")]
    NonFiniteScore(String),

    #[error("duplicate entity {0}")]
    DuplicateEntity(String),
}

/// One contribution to a candidate's score.
#[derive(Debug, Clone, PartialEq)]
struct Factor {
    contribution: f32,
    label: String,
}

/// Scores candidates against a requirement profile.
///
/// Pure and deterministic: identical input always yields identical output.
#[derive(Debug, Clone, Default)]
pub struct RankingEngine {
    weights: RankingWeights,
}

impl RankingEngine {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    /// Weights the engine was built with
    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Score and sort candidates.
    pub fn rank(
        &self,
        profile: &RequirementProfile,
        candidates: Vec<MatchCandidate>,
    ) -> Result<Vec<MatchCandidate>, RankingError> {
        let mut seen = std::collections::HashSet::with_capacity(candidates.len());
        for candidate in &candidates {
            if !candidate.raw_vector_score.is_finite() {
                return Err(RankingError::NonFiniteScore(candidate.entity_id.clone()));
            }
            if !seen.insert(candidate.entity_id.as_str()) {
                return Err(RankingError::DuplicateEntity(candidate.entity_id.clone()));
            }
        }

        let mut ranked: Vec<MatchCandidate> = candidates
            .into_iter()
            .map(|candidate| self.score(profile, candidate))
            .collect();
        sort_candidates(&mut ranked);
        Ok(ranked)
    }

    fn score(&self, profile: &RequirementProfile, mut candidate: MatchCandidate) -> MatchCandidate {
        let raw = candidate.raw_vector_score.clamp(0.0, 1.0);
        let mut factors = vec![Factor {
            contribution: raw,
            label: format!("semantic similarity {:.2}", raw),
        }];

        let entity_skills = attribute_skills(&candidate.attributes);
        let matched: Vec<&str> = profile
            .skills
            .iter()
            .filter(|skill| entity_skills.contains(skill))
            .map(String::as_str)
            .collect();
        if !matched.is_empty() {
            let bonus = (self.weights.skill_bonus * matched.len() as f32).min(self.weights.skill_bonus_cap);
            factors.push(Factor {
                contribution: bonus,
                label: format!(
                    "{} matching skill{} ({}) +{:.2}",
                    matched.len(),
                    if matched.len() == 1 { "" } else { "s" },
                    matched.join(", "),
                    bonus
                ),
            });
        }

        let entity_location = candidate
            .attributes
            .get("location")
            .and_then(|v| v.as_str())
            .map(normalize);
        if let (Some(wanted), Some(actual)) = (profile.location.as_deref().map(normalize), entity_location) {
            if !wanted.is_empty() && wanted == actual {
                factors.push(Factor {
                    contribution: self.weights.location_bonus,
                    label: format!("location match ({}) +{:.2}", actual, self.weights.location_bonus),
                });
            }
        }

        if experience_outside_band(profile, &candidate) {
            factors.push(Factor {
                contribution: -self.weights.experience_penalty,
                label: format!(
                    "experience outside requested band -{:.2}",
                    self.weights.experience_penalty
                ),
            });
        }

        let adjusted: f32 = factors.iter().map(|f| f.contribution).sum();
        candidate.raw_vector_score = raw;
        candidate.adjusted_score = adjusted.clamp(0.0, 1.0);
        candidate.rationale = rationale(factors);
        candidate
    }
}

/// Missing data on either side never counts as outside the band.
fn experience_outside_band(profile: &RequirementProfile, candidate: &MatchCandidate) -> bool {
    if let (Some(band), Some(years)) = (profile.experience_band, attribute_years(&candidate.attributes)) {
        return !band.contains(years);
    }
    if let (Some(years), Some(band)) = (
        profile.experience_years,
        ExperienceBand::from_attributes(&candidate.attributes),
    ) {
        return !band.contains(years);
    }
    false
}

/// Top two factors by absolute contribution; earlier factors win ties.
fn rationale(mut factors: Vec<Factor>) -> String {
    factors.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(Ordering::Equal)
    });
    factors
        .into_iter()
        .take(2)
        .map(|f| f.label)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sort by adjusted score descending, then entity id ascending.
pub fn sort_candidates(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        b.adjusted_score
            .total_cmp(&a.adjusted_score)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
}
