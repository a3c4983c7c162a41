//! Ranking: similarity plus rule-based adjustments.
//!
//! `adjusted = raw + skill bonus (capped) + location bonus - experience penalty`,
//! clamped to [0, 1]. Output is sorted by adjusted score descending, ties by
//! entity id ascending.

mod engine;
mod profile;

pub use engine::{sort_candidates, RankingEngine, RankingError, RankingWeights};
pub use profile::{attribute_skills, attribute_years, normalize, ExperienceBand, RequirementProfile};
