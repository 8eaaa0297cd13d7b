//! Conversation-structure domain types.

use serde::{Deserialize, Serialize};

/// Bounded vocabulary for unit kinds. Loose model output maps through
/// [`UnitType::parse_loose`]; anything unrecognized lands on `Discussion`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Intro,
    #[default]
    Discussion,
    QAndA,
    Anecdote,
    Debate,
    Summary,
    Outro,
}

impl UnitType {
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace(['-', ' ', '&'], "_").as_str() {
            "intro" | "introduction" | "opening" => UnitType::Intro,
            "q_and_a" | "qa" | "q_a" | "question_answer" | "interview" => UnitType::QAndA,
            "anecdote" | "story" => UnitType::Anecdote,
            "debate" | "disagreement" => UnitType::Debate,
            "summary" | "recap" | "conclusion" => UnitType::Summary,
            "outro" | "closing" => UnitType::Outro,
            _ => UnitType::Discussion,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Intro => "intro",
            UnitType::Discussion => "discussion",
            UnitType::QAndA => "q_and_a",
            UnitType::Anecdote => "anecdote",
            UnitType::Debate => "debate",
            UnitType::Summary => "summary",
            UnitType::Outro => "outro",
        }
    }
}

/// One theme the analyzer found, with the units that explore it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub related_units: Vec<String>,
}

/// A suggested unit boundary: an inclusive span of segment indices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitSpan {
    pub start_index: usize,
    pub end_index: usize,
    pub unit_type: UnitType,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default = "default_true")]
    pub is_complete: bool,
}

fn default_true() -> bool {
    true
}

/// Per-episode conversation structure from the analyzer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationStructure {
    pub themes: Vec<Theme>,
    pub spans: Vec<UnitSpan>,
    #[serde(default)]
    pub narrative_arc: String,
    /// Clamped to `[0, 1]`.
    #[serde(default)]
    pub coherence_score: f64,
}

/// A semantically coherent span of utterances.
///
/// Invariant: units cover the episode monotonically; `start_time`/`end_time`
/// derive from the first/last contained segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeaningfulUnit {
    pub unit_id: String,
    pub unit_type: UnitType,
    #[serde(default)]
    pub summary: String,
    pub start_time: f64,
    pub end_time: f64,
    pub segment_indices: Vec<usize>,
    #[serde(default)]
    pub themes: Vec<String>,
    pub is_complete: bool,
    /// Concatenated speaker-attributed text, the extraction prompt's body.
    pub text: String,
}
