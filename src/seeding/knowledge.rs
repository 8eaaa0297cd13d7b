//! Extracted-knowledge domain types.

use serde::{Deserialize, Serialize};

/// One entity mention inside a unit. `entity_type` is normalized to
/// uppercase; entities of different types never merge during resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: f64,
    #[serde(default = "one")]
    pub mention_count: u32,
}

fn one() -> u32 {
    1
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Factual,
    Opinion,
    Prediction,
    Recommendation,
    #[default]
    KeyPoint,
}

impl InsightType {
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "factual" | "fact" => InsightType::Factual,
            "opinion" => InsightType::Opinion,
            "prediction" | "forecast" => InsightType::Prediction,
            "recommendation" | "advice" => InsightType::Recommendation,
            _ => InsightType::KeyPoint,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub content: String,
    pub insight_type: InsightType,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteType {
    #[default]
    Memorable,
    Controversial,
    Humorous,
    Insightful,
    Technical,
}

impl QuoteType {
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "controversial" => QuoteType::Controversial,
            "humorous" | "funny" => QuoteType::Humorous,
            "insightful" => QuoteType::Insightful,
            "technical" => QuoteType::Technical,
            _ => QuoteType::Memorable,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub quote_type: QuoteType,
    pub importance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_entity: String,
    pub target_entity: String,
    pub relationship_type: String,
    pub confidence: f64,
}

/// Everything extracted from one meaningful unit. A failed extraction leaves
/// all lists empty; the episode continues.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitKnowledge {
    pub unit_id: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub quotes: Vec<Quote>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub themes: Vec<String>,
}

/// Clamp a model-reported score into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_clamping() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn loose_vocabularies_have_defaults() {
        assert_eq!(InsightType::parse_loose("forecast"), InsightType::Prediction);
        assert_eq!(InsightType::parse_loose("???"), InsightType::KeyPoint);
        assert_eq!(QuoteType::parse_loose("funny"), QuoteType::Humorous);
        assert_eq!(QuoteType::parse_loose("???"), QuoteType::Memorable);
    }
}
