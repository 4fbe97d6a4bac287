//! Cause taxonomy and confidence tiers for cry guidance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inferred cause of a crying episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseLabel {
    Hunger,
    Discomfort,
    EmotionalNeed,
    Unknown,
}

impl CauseLabel {
    /// All recognized labels, in canonical order.
    pub const ALL: [CauseLabel; 4] = [
        CauseLabel::Hunger,
        CauseLabel::Discomfort,
        CauseLabel::EmotionalNeed,
        CauseLabel::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CauseLabel::Hunger => "hunger",
            CauseLabel::Discomfort => "discomfort",
            CauseLabel::EmotionalNeed => "emotional_need",
            CauseLabel::Unknown => "unknown",
        }
    }

    /// Parse a label string; anything outside the taxonomy is rejected.
    pub fn parse(value: &str) -> Option<CauseLabel> {
        match value {
            "hunger" => Some(CauseLabel::Hunger),
            "discomfort" => Some(CauseLabel::Discomfort),
            "emotional_need" => Some(CauseLabel::EmotionalNeed),
            "unknown" => Some(CauseLabel::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for CauseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caregiver-facing confidence tier derived from the blended confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> ConfidenceLevel {
        if score >= 0.75 {
            ConfidenceLevel::High
        } else if score >= 0.45 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

/// True if the value is usable as a probability.
pub fn is_probability(value: f64) -> bool {
    (0.0..=1.0).contains(&value) && value.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        for label in CauseLabel::ALL {
            assert_eq!(CauseLabel::parse(label.as_str()), Some(label));
        }
        assert_eq!(CauseLabel::parse("colic"), None);
    }

    #[test]
    fn test_label_serde_strings() {
        let json = serde_json::to_string(&CauseLabel::EmotionalNeed).unwrap();
        assert_eq!(json, "\"emotional_need\"");
        let back: CauseLabel = serde_json::from_str("\"hunger\"").unwrap();
        assert_eq!(back, CauseLabel::Hunger);
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(ConfidenceLevel::from_score(0.75), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.7499), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.45), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.4499), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.0), ConfidenceLevel::Low);
    }

    #[test]
    fn test_is_probability_bounds() {
        assert!(is_probability(0.0));
        assert!(is_probability(1.0));
        assert!(!is_probability(-0.01));
        assert!(!is_probability(1.01));
        assert!(!is_probability(f64::NAN));
    }
}
