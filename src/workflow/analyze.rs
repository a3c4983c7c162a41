//! Requirement extraction from a match request.
//!
//! Free text is scanned for skills ("skills: go, kubernetes"), years of
//! experience ("6 years"), a location ("in Berlin"), a seniority level and
//! remote preference. Structured preferences, when present, override what
//! the text says.

use regex::Regex;

use crate::ranking::{ExperienceBand, RequirementProfile};
use crate::types::MatchRequest;

pub struct ProfileAnalyzer {
    skills: Regex,
    years: Regex,
    location: Regex,
    level: Regex,
    remote: Regex,
    list_split: Regex,
}

impl ProfileAnalyzer {
    pub fn new() -> Self {
        Self {
            skills: Regex::new(
                r"(?i)\b(?:skills?|experienced with|proficient in|knowledge of)\b\s*(?:including|include|are|in\b|:)?\s*:?\s*([^.;\n]+)",
            )
            .expect("valid skills regex"),
            years: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*\+?\s*(?:years?|yrs?)\b")
                .expect("valid years regex"),
            location: Regex::new(
                r"\b(?:[Ll]ocated in|[Bb]ased in|[Ll]iving in|[Ii]n|[Nn]ear)\s+([A-Z][\w-]*(?:\s+[A-Z][\w-]*)*)",
            )
            .expect("valid location regex"),
            level: Regex::new(r"(?i)\b(entry|junior|mid|intermediate|senior|lead|principal)\b")
                .expect("valid level regex"),
            remote: Regex::new(r"(?i)\bremote\b").expect("valid remote regex"),
            list_split: Regex::new(r"(?i)\s*(?:,|/|\band\b|&)\s*").expect("valid split regex"),
        }
    }

    /// Build the requirement profile, or explain why the request is unusable.
    pub fn analyze(&self, request: &MatchRequest) -> Result<RequirementProfile, String> {
        if request.requester_id.trim().is_empty() {
            return Err("requester_id is empty".to_string());
        }

        let text = request.free_text_message.trim();
        let mut profile = RequirementProfile::new(text);

        for captures in self.skills.captures_iter(text) {
            for skill in self.list_split.split(&captures[1]) {
                let skill = skill.trim();
                // Keep short tokens only; long fragments are prose, not skills.
                if !skill.is_empty() && skill.split_whitespace().count() <= 3 {
                    profile.add_skill(skill);
                }
            }
        }

        profile.experience_years = self
            .years
            .captures(text)
            .and_then(|c| c[1].parse::<f32>().ok());

        profile.location = self
            .location
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .find(|candidate| !profile.skills.contains(&candidate.to_lowercase()));

        profile.experience_band = self
            .level
            .captures(text)
            .and_then(|c| ExperienceBand::from_level(&c[1]));

        if self.remote.is_match(text) {
            profile.remote_ok = Some(true);
        }

        if let Some(prefs) = &request.structured_preferences {
            if !prefs.skills.is_empty() {
                profile.skills.clear();
                for skill in &prefs.skills {
                    profile.add_skill(skill);
                }
            }
            if let Some(location) = prefs.location.as_ref().filter(|l| !l.trim().is_empty()) {
                profile.location = Some(location.trim().to_string());
            }
            if let Some(years) = prefs.experience_years {
                profile.experience_years = Some(years);
            }
            if let Some(band) = prefs.experience_level.as_deref().and_then(ExperienceBand::from_level) {
                profile.experience_band = Some(band);
            }
            if prefs.remote_ok.is_some() {
                profile.remote_ok = prefs.remote_ok;
            }
        }

        if profile.search_text.is_empty() {
            let mut parts = profile.skills.clone();
            if let Some(location) = &profile.location {
                parts.push(location.clone());
            }
            if let Some(level) = request
                .structured_preferences
                .as_ref()
                .and_then(|p| p.experience_level.clone())
            {
                parts.push(level);
            }
            profile.search_text = parts.join(" ");
        }

        if profile.search_text.trim().is_empty() {
            return Err("request has no message and no usable preferences".to_string());
        }

        Ok(profile)
    }
}

impl Default for ProfileAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructuredPreferences;

    #[test]
    fn test_extracts_from_free_text() {
        let analyzer = ProfileAnalyzer::new();
        let request = MatchRequest::new(
            "candidate:7",
            "Senior backend engineer with 6 years, skills: Go, Kubernetes and PostgreSQL. Looking for work in Berlin, remote is fine.",
        );
        let profile = analyzer.analyze(&request).unwrap();

        assert_eq!(profile.skills, vec!["go", "kubernetes", "postgresql"]);
        assert_eq!(profile.experience_years, Some(6.0));
        assert_eq!(profile.location.as_deref(), Some("Berlin"));
        assert_eq!(profile.experience_band, ExperienceBand::from_level("senior"));
        assert_eq!(profile.remote_ok, Some(true));
    }

    #[test]
    fn test_skill_is_not_a_location() {
        let analyzer = ProfileAnalyzer::new();
        let request = MatchRequest::new("u1", "Skills: Go. I mostly write code in Go");
        let profile = analyzer.analyze(&request).unwrap();
        assert_eq!(profile.location, None);
    }

    #[test]
    fn test_structured_preferences_win() {
        let analyzer = ProfileAnalyzer::new();
        let request = MatchRequest::new("u1", "junior developer in Paris, skills: java").with_preferences(
            StructuredPreferences {
                skills: vec!["Rust".into()],
                location: Some("Berlin".into()),
                experience_years: Some(4.0),
                experience_level: Some("mid".into()),
                remote_ok: Some(false),
            },
        );
        let profile = analyzer.analyze(&request).unwrap();

        assert_eq!(profile.skills, vec!["rust"]);
        assert_eq!(profile.location.as_deref(), Some("Berlin"));
        assert_eq!(profile.experience_years, Some(4.0));
        assert_eq!(profile.experience_band, Some(ExperienceBand::new(3.0, 5.0)));
        assert_eq!(profile.remote_ok, Some(false));
    }

    #[test]
    fn test_preferences_only_request() {
        let analyzer = ProfileAnalyzer::new();
        let request = MatchRequest::new("u1", "  ").with_preferences(StructuredPreferences {
            skills: vec!["go".into(), "kubernetes".into()],
            ..Default::default()
        });
        let profile = analyzer.analyze(&request).unwrap();
        assert_eq!(profile.search_text, "go kubernetes");
    }

    #[test]
    fn test_empty_request_rejected() {
        let analyzer = ProfileAnalyzer::new();
        assert!(analyzer.analyze(&MatchRequest::new("u1", "   ")).is_err());
        assert!(analyzer.analyze(&MatchRequest::new("", "rust jobs")).is_err());
    }
}
