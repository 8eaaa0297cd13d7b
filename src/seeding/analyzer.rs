//! LLM-assisted conversation-structure analysis.
//!
//! One JSON-mode call proposes themes, unit boundaries, a narrative arc and
//! a coherence score. A malformed response gets one retry; after that the
//! episode degrades to a single all-covering unit rather than failing.

use serde::Deserialize;

use crate::episode::Episode;
use crate::gateway::{GatewayError, LlmGateway, clean_model_text};
use crate::seeding::knowledge::clamp_confidence;
use crate::seeding::structure::{ConversationStructure, Theme, UnitSpan, UnitType};
use crate::vtt::Cue;

/// Render cues as indexed dialogue lines for the analysis prompt.
fn transcript_lines(cues: &[Cue]) -> String {
    cues.iter()
        .enumerate()
        .map(|(i, cue)| {
            format!(
                "[{i}] {}: {}",
                cue.speaker.as_deref().unwrap_or("UNKNOWN"),
                cue.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn analysis_prompt(episode: &Episode, cues: &[Cue]) -> String {
    format!(
        "Analyze the structure of this podcast conversation.\n\
         Podcast: {podcast}\n\
         Episode: {title}\n\n\
         Transcript ({n} numbered utterances):\n{transcript}\n\n\
         Respond with JSON only:\n\
         {{\n\
           \"themes\": [{{\"name\": \"...\", \"description\": \"one line\"}}],\n\
           \"units\": [{{\"start_index\": 0, \"end_index\": 4, \"unit_type\": \"intro|discussion|q_and_a|anecdote|debate|summary|outro\", \"summary\": \"...\", \"themes\": [\"...\"], \"is_complete\": true}}],\n\
           \"narrative_arc\": \"one short label\",\n\
           \"coherence_score\": 0.0\n\
         }}\n\
         Units must cover the transcript in order using the utterance indices\n\
         shown in brackets; spans are inclusive.",
        podcast = episode.podcast_name,
        title = episode.title,
        n = cues.len(),
        transcript = transcript_lines(cues),
    )
}

#[derive(Debug, Deserialize)]
struct RawTheme {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawSpan {
    start_index: usize,
    end_index: usize,
    #[serde(default)]
    unit_type: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default = "default_true")]
    is_complete: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawStructure {
    #[serde(default)]
    themes: Vec<RawTheme>,
    #[serde(default)]
    units: Vec<RawSpan>,
    #[serde(default)]
    narrative_arc: String,
    #[serde(default)]
    coherence_score: f64,
}

fn parse_structure(text: &str) -> Result<ConversationStructure, String> {
    let cleaned = clean_model_text(text);
    let raw: RawStructure = serde_json::from_str(&cleaned).map_err(|e| e.to_string())?;
    if raw.units.is_empty() {
        return Err("no units proposed".to_string());
    }
    Ok(ConversationStructure {
        themes: raw
            .themes
            .into_iter()
            .filter(|t| !t.name.trim().is_empty())
            .map(|t| Theme {
                name: t.name.trim().to_string(),
                description: t.description,
                related_units: Vec::new(),
            })
            .collect(),
        spans: raw
            .units
            .into_iter()
            .map(|s| UnitSpan {
                start_index: s.start_index,
                end_index: s.end_index,
                unit_type: UnitType::parse_loose(&s.unit_type),
                summary: s.summary,
                themes: s.themes,
                is_complete: s.is_complete,
            })
            .collect(),
        narrative_arc: raw.narrative_arc,
        coherence_score: clamp_confidence(raw.coherence_score),
    })
}

/// Degenerate structure: the whole episode as one discussion unit.
pub fn fallback_structure(segment_count: usize) -> ConversationStructure {
    ConversationStructure {
        themes: Vec::new(),
        spans: vec![UnitSpan {
            start_index: 0,
            end_index: segment_count.saturating_sub(1),
            unit_type: UnitType::Discussion,
            summary: String::new(),
            themes: Vec::new(),
            is_complete: true,
        }],
        narrative_arc: "unsegmented".to_string(),
        coherence_score: 0.0,
    }
}

/// Analyze an episode's conversation structure.
///
/// Quota exhaustion propagates; any other failure (call or parse, after one
/// retry) falls back to [`fallback_structure`].
pub async fn analyze(
    gateway: &LlmGateway,
    cues: &[Cue],
    episode: &Episode,
) -> Result<ConversationStructure, GatewayError> {
    if cues.is_empty() {
        return Ok(fallback_structure(0));
    }
    let prompt = analysis_prompt(episode, cues);

    for attempt in 1..=2u32 {
        match gateway.extract(prompt.clone(), true).await {
            Ok(text) => match parse_structure(&text) {
                Ok(structure) => {
                    tracing::info!(
                        themes = structure.themes.len(),
                        units = structure.spans.len(),
                        coherence = structure.coherence_score,
                        "conversation structure analyzed"
                    );
                    return Ok(structure);
                }
                Err(message) => {
                    tracing::warn!(attempt, error = %message, "structure response malformed");
                }
            },
            Err(err @ GatewayError::QuotaExhausted) => return Err(err),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "structure analysis call failed");
                break;
            }
        }
    }
    tracing::warn!("falling back to single-unit structure");
    Ok(fallback_structure(cues.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_structure() {
        let text = r#"{
            "themes": [{"name": "AI", "description": "machine minds"}],
            "units": [
                {"start_index": 0, "end_index": 2, "unit_type": "intro", "summary": "opening"},
                {"start_index": 3, "end_index": 9, "unit_type": "q&a", "themes": ["AI"]}
            ],
            "narrative_arc": "interview",
            "coherence_score": 1.4
        }"#;
        let s = parse_structure(text).unwrap();
        assert_eq!(s.themes.len(), 1);
        assert_eq!(s.spans.len(), 2);
        assert_eq!(s.spans[1].unit_type, UnitType::QAndA);
        // Out-of-range score clamped.
        assert_eq!(s.coherence_score, 1.0);
    }

    #[test]
    fn empty_units_are_malformed() {
        assert!(parse_structure(r#"{"themes": [], "units": []}"#).is_err());
        assert!(parse_structure("nonsense").is_err());
    }

    #[test]
    fn fallback_covers_everything() {
        let s = fallback_structure(12);
        assert_eq!(s.spans.len(), 1);
        assert_eq!(s.spans[0].start_index, 0);
        assert_eq!(s.spans[0].end_index, 11);
    }
}
