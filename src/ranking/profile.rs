//! Requirement profiles and experience bands.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Inclusive range of years of experience.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExperienceBand {
    pub min: f32,
    pub max: f32,
}

impl ExperienceBand {
    pub fn new(min: f32, max: f32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Band for a seniority level name.
    pub fn from_level(level: &str) -> Option<Self> {
        let (min, max) = match level.trim().to_lowercase().as_str() {
            "entry" | "junior" => (0.0, 2.0),
            "mid" | "intermediate" => (3.0, 5.0),
            "senior" => (5.0, 8.0),
            "lead" => (8.0, 12.0),
            "principal" => (12.0, 20.0),
            _ => return None,
        };
        Some(Self { min, max })
    }

    pub fn contains(&self, years: f32) -> bool {
        years >= self.min && years <= self.max
    }

    /// Band described by record attributes: explicit `experience_min` /
    /// `experience_max`, else `experience_level`.
    pub fn from_attributes(attributes: &Map<String, JsonValue>) -> Option<Self> {
        let min = attributes.get("experience_min").and_then(JsonValue::as_f64);
        let max = attributes.get("experience_max").and_then(JsonValue::as_f64);
        match (min, max) {
            (Some(min), Some(max)) => Some(Self::new(min as f32, max as f32)),
            (Some(min), None) => Some(Self::new(min as f32, f32::MAX)),
            (None, Some(max)) => Some(Self::new(0.0, max as f32)),
            (None, None) => attributes
                .get("experience_level")
                .and_then(JsonValue::as_str)
                .and_then(Self::from_level),
        }
    }
}

/// What the requester is looking for.
///
/// Skills are stored trimmed and lowercased; `search_text` is the text
/// embedded for the similarity query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementProfile {
    pub skills: Vec<String>,
    pub location: Option<String>,
    pub experience_years: Option<f32>,
    pub experience_band: Option<ExperienceBand>,
    pub remote_ok: Option<bool>,
    pub search_text: String,
}

impl RequirementProfile {
    pub fn new(search_text: impl Into<String>) -> Self {
        Self {
            search_text: search_text.into(),
            ..Default::default()
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for skill in skills {
            self.add_skill(skill.as_ref());
        }
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_experience_years(mut self, years: f32) -> Self {
        self.experience_years = Some(years);
        self
    }

    pub fn with_experience_band(mut self, band: ExperienceBand) -> Self {
        self.experience_band = Some(band);
        self
    }

    /// Add a skill, normalised and deduplicated.
    pub fn add_skill(&mut self, skill: &str) {
        let skill = normalize(skill);
        if !skill.is_empty() && !self.skills.contains(&skill) {
            self.skills.push(skill);
        }
    }
}

/// Trimmed, lowercased form used for comparisons.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Experience years recorded on an entity, if any.
pub fn attribute_years(attributes: &Map<String, JsonValue>) -> Option<f32> {
    attributes
        .get("experience_years")
        .and_then(JsonValue::as_f64)
        .map(|y| y as f32)
}

/// Skills listed on an entity, normalised.
pub fn attribute_skills(attributes: &Map<String, JsonValue>) -> Vec<String> {
    match attributes.get("skills") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(normalize)
            .collect(),
        Some(JsonValue::String(list)) => list.split(',').map(normalize).filter(|s| !s.is_empty()).collect(),
        _ => Vec::new(),
    }
}
