//! Per-unit knowledge extraction.
//!
//! Each meaningful unit gets one JSON-mode extraction call. Units run at
//! most three at a time; every call still passes through the gateway and so
//! through the shared quota state. A unit whose extraction fails contributes
//! an empty result; extraction never fails the episode.

use futures_util::StreamExt;
use futures_util::stream;
use serde::Deserialize;

use crate::episode::Episode;
use crate::gateway::{LlmGateway, clean_model_text};
use crate::seeding::knowledge::{
    Entity, Insight, InsightType, Quote, QuoteType, Relationship, UnitKnowledge, clamp_confidence,
};
use crate::seeding::structure::MeaningfulUnit;

/// Units extracted concurrently at the gateway.
pub const UNIT_CONCURRENCY: usize = 3;

fn extraction_prompt(episode: &Episode, unit: &MeaningfulUnit) -> String {
    format!(
        "Extract structured knowledge from this podcast conversation segment.\n\
         Podcast: {podcast}\n\
         Episode: {title}\n\
         Segment type: {unit_type}\n\
         Segment summary hint: {summary}\n\n\
         Segment transcript:\n{text}\n\n\
         Respond with JSON only:\n\
         {{\n\
           \"entities\": [{{\"name\": \"...\", \"type\": \"PERSON|ORGANIZATION|TECHNOLOGY|CONCEPT|...\", \"description\": \"...\", \"confidence\": 0.0, \"mention_count\": 1}}],\n\
           \"insights\": [{{\"content\": \"...\", \"type\": \"factual|opinion|prediction|recommendation|key_point\", \"confidence\": 0.0}}],\n\
           \"quotes\": [{{\"text\": \"...\", \"speaker\": \"...\", \"type\": \"memorable|controversial|humorous|insightful|technical\", \"importance\": 0.0}}],\n\
           \"relationships\": [{{\"source\": \"...\", \"target\": \"...\", \"type\": \"...\", \"confidence\": 0.0}}],\n\
           \"themes\": [\"...\"]\n\
         }}",
        podcast = episode.podcast_name,
        title = episode.title,
        unit_type = unit.unit_type.as_str(),
        summary = if unit.summary.is_empty() { "(none)" } else { &unit.summary },
        text = unit.text,
    )
}

#[derive(Debug, Default, Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: String,
    #[serde(default, alias = "entity_type")]
    r#type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    mention_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInsight {
    #[serde(default)]
    content: String,
    #[serde(default, alias = "insight_type")]
    r#type: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawQuote {
    #[serde(default)]
    text: String,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default, alias = "quote_type")]
    r#type: String,
    #[serde(default)]
    importance: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawRelationship {
    #[serde(default, alias = "source_entity")]
    source: String,
    #[serde(default, alias = "target_entity")]
    target: String,
    #[serde(default, alias = "relationship_type")]
    r#type: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    insights: Vec<RawInsight>,
    #[serde(default)]
    quotes: Vec<RawQuote>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
    #[serde(default)]
    themes: Vec<String>,
}

/// Validate a raw extraction: clamp scores, normalize types, drop entries
/// missing required fields.
fn validate(unit_id: &str, raw: RawExtraction) -> UnitKnowledge {
    UnitKnowledge {
        unit_id: unit_id.to_string(),
        entities: raw
            .entities
            .into_iter()
            .filter(|e| !e.name.trim().is_empty() && !e.r#type.trim().is_empty())
            .map(|e| Entity {
                name: e.name.trim().to_string(),
                entity_type: e.r#type.trim().to_uppercase(),
                description: e.description.filter(|d| !d.trim().is_empty()),
                confidence: clamp_confidence(e.confidence),
                mention_count: e.mention_count.unwrap_or(1).max(1),
            })
            .collect(),
        insights: raw
            .insights
            .into_iter()
            .filter(|i| !i.content.trim().is_empty())
            .map(|i| Insight {
                content: i.content.trim().to_string(),
                insight_type: InsightType::parse_loose(&i.r#type),
                confidence: clamp_confidence(i.confidence),
            })
            .collect(),
        quotes: raw
            .quotes
            .into_iter()
            .filter(|q| !q.text.trim().is_empty())
            .map(|q| Quote {
                text: q.text.trim().to_string(),
                speaker: q.speaker.filter(|s| !s.trim().is_empty()),
                quote_type: QuoteType::parse_loose(&q.r#type),
                importance: clamp_confidence(q.importance),
            })
            .collect(),
        relationships: raw
            .relationships
            .into_iter()
            .filter(|r| !r.source.trim().is_empty() && !r.target.trim().is_empty())
            .map(|r| Relationship {
                source_entity: r.source.trim().to_string(),
                target_entity: r.target.trim().to_string(),
                relationship_type: if r.r#type.trim().is_empty() {
                    "RELATED_TO".to_string()
                } else {
                    r.r#type.trim().to_uppercase()
                },
                confidence: clamp_confidence(r.confidence),
            })
            .collect(),
        themes: raw
            .themes
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    }
}

async fn extract_one(
    gateway: &LlmGateway,
    episode: &Episode,
    unit: &MeaningfulUnit,
) -> UnitKnowledge {
    let prompt = extraction_prompt(episode, unit);
    match gateway.extract(prompt, true).await {
        Ok(text) => {
            let cleaned = clean_model_text(&text);
            match serde_json::from_str::<RawExtraction>(&cleaned) {
                Ok(raw) => validate(&unit.unit_id, raw),
                Err(err) => {
                    tracing::warn!(unit = %unit.unit_id, error = %err, "extraction response malformed; unit left empty");
                    UnitKnowledge {
                        unit_id: unit.unit_id.clone(),
                        ..Default::default()
                    }
                }
            }
        }
        Err(err) => {
            tracing::warn!(unit = %unit.unit_id, error = %err, "extraction call failed; unit left empty");
            UnitKnowledge {
                unit_id: unit.unit_id.clone(),
                ..Default::default()
            }
        }
    }
}

/// Extract all units with bounded concurrency, preserving unit order.
pub async fn extract_units(
    gateway: &LlmGateway,
    episode: &Episode,
    units: &[MeaningfulUnit],
) -> Vec<UnitKnowledge> {
    stream::iter(units.iter().map(|unit| extract_one(gateway, episode, unit)))
        .buffered(UNIT_CONCURRENCY)
        .collect()
        .await
}
