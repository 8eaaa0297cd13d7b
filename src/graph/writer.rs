//! Translating one episode's extraction results into graph upserts.
//!
//! Node ids are derived so that re-running an episode replaces its subgraph:
//! the episode id is the feed guid, and every dependent id is prefixed with
//! it. Entity ids hash the canonical name with `FxHasher`, which is
//! deterministic across processes.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHasher;
use serde::Serialize;

use crate::seeding::resolver::ResolutionOutcome;
use crate::seeding::structure::{ConversationStructure, MeaningfulUnit};
use crate::seeding::knowledge::UnitKnowledge;
use crate::text::slug;

use super::{GraphEdge, GraphError, GraphNode, GraphStore};

/// Stable lower-hex digest of a canonical name.
pub fn entity_hash(canonical_name: &str) -> String {
    let mut hasher = FxHasher::default();
    canonical_name.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Everything the writer needs for one episode.
pub struct GraphWriteInput<'a> {
    pub episode_guid: &'a str,
    pub podcast_name: &'a str,
    pub episode_title: &'a str,
    pub episode_date: Option<DateTime<Utc>>,
    pub structure: &'a ConversationStructure,
    pub units: &'a [MeaningfulUnit],
    pub knowledge: &'a [UnitKnowledge],
    pub resolution: &'a ResolutionOutcome,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Thin translator from extraction results to store upserts. Owns nothing
/// persistent; all state lives in the store.
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Write the episode subgraph. Upserts are idempotent, so a retry after
    /// partial failure converges without rollback.
    pub async fn write_episode(&self, input: &GraphWriteInput<'_>) -> Result<WriteStats, GraphError> {
        let mut stats = WriteStats::default();
        let guid = input.episode_guid;

        let podcast_id = format!("podcast_{}", slug(input.podcast_name));
        self.node(
            &mut stats,
            GraphNode::new(&podcast_id, "Podcast").with("name", input.podcast_name),
        )
        .await?;

        let mut episode_node = GraphNode::new(guid, "Episode")
            .with("title", input.episode_title)
            .with("podcast", input.podcast_name);
        if let Some(date) = input.episode_date {
            episode_node = episode_node.with("date", date.format("%Y-%m-%d").to_string());
        }
        self.node(&mut stats, episode_node).await?;
        self.edge(&mut stats, GraphEdge::new(&podcast_id, guid, "HAS_EPISODE"))
            .await?;

        let structure_id = format!("{guid}_structure");
        self.node(
            &mut stats,
            GraphNode::new(&structure_id, "ConversationStructure")
                .with("narrative_arc", input.structure.narrative_arc.as_str())
                .with("coherence_score", input.structure.coherence_score)
                .with("unit_count", input.units.len()),
        )
        .await?;
        self.edge(
            &mut stats,
            GraphEdge::new(guid, &structure_id, "HAS_STRUCTURE"),
        )
        .await?;

        // Themes: the analyzer's episode-level themes plus any unit-level
        // theme names extraction surfaced.
        let mut theme_names: Vec<String> = input
            .structure
            .themes
            .iter()
            .map(|t| t.name.clone())
            .collect();
        for unit in input.units {
            for name in &unit.themes {
                if !theme_names.iter().any(|t| t.eq_ignore_ascii_case(name)) {
                    theme_names.push(name.clone());
                }
            }
        }
        for name in &theme_names {
            let theme_id = theme_node_id(guid, name);
            let description = input
                .structure
                .themes
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name))
                .map(|t| t.description.clone())
                .unwrap_or_default();
            self.node(
                &mut stats,
                GraphNode::new(&theme_id, "Theme")
                    .with("name", name.as_str())
                    .with("description", description),
            )
            .await?;
            self.edge(
                &mut stats,
                GraphEdge::new(&structure_id, &theme_id, "CONTAINS_THEME"),
            )
            .await?;
        }

        // Units and their contents.
        for unit in input.units {
            let unit_id = format!("{guid}_{}", unit.unit_id);
            self.node(
                &mut stats,
                GraphNode::new(&unit_id, "MeaningfulUnit")
                    .with("unit_type", unit.unit_type.as_str())
                    .with("summary", unit.summary.as_str())
                    .with("start_time", unit.start_time)
                    .with("end_time", unit.end_time)
                    .with("is_complete", unit.is_complete),
            )
            .await?;
            self.edge(
                &mut stats,
                GraphEdge::new(&structure_id, &unit_id, "CONTAINS_UNIT"),
            )
            .await?;
            for theme in &unit.themes {
                self.edge(
                    &mut stats,
                    GraphEdge::new(&unit_id, theme_node_id(guid, theme), "EXPLORES_THEME"),
                )
                .await?;
            }
        }

        // Canonical entities, labeled by type.
        for entity in &input.resolution.canonical {
            let entity_id = entity_node_id(guid, &entity.canonical_name);
            self.node(
                &mut stats,
                GraphNode::new(&entity_id, entity.entity_type.as_str())
                    .with("name", entity.canonical_name.as_str())
                    .with(
                        "aliases",
                        serde_json::Value::Array(
                            entity
                                .aliases
                                .iter()
                                .map(|a| serde_json::Value::String(a.clone()))
                                .collect(),
                        ),
                    )
                    .with("mention_count", entity.total_mentions)
                    .with("confidence", entity.confidence),
            )
            .await?;
            self.edge(&mut stats, GraphEdge::new(guid, &entity_id, "MENTIONS"))
                .await?;
        }

        // Insights, quotes, and theme↔entity connections per unit.
        for knowledge in input.knowledge {
            let unit_id = format!("{guid}_{}", knowledge.unit_id);
            let unit_themes: Vec<&String> = input
                .units
                .iter()
                .find(|u| u.unit_id == knowledge.unit_id)
                .map(|u| u.themes.iter().collect())
                .unwrap_or_default();

            for (i, insight) in knowledge.insights.iter().enumerate() {
                let insight_id = format!("{unit_id}_insight_{i:02}");
                self.node(
                    &mut stats,
                    GraphNode::new(&insight_id, "Insight")
                        .with("content", insight.content.as_str())
                        .with(
                            "insight_type",
                            serde_json::to_value(insight.insight_type)
                                .unwrap_or(serde_json::Value::Null),
                        )
                        .with("confidence", insight.confidence),
                )
                .await?;
                self.edge(
                    &mut stats,
                    GraphEdge::new(&unit_id, &insight_id, "CONTAINS_INSIGHT"),
                )
                .await?;
            }

            for (i, quote) in knowledge.quotes.iter().enumerate() {
                let quote_id = format!("{unit_id}_quote_{i:02}");
                let mut node = GraphNode::new(&quote_id, "Quote")
                    .with("text", quote.text.as_str())
                    .with(
                        "quote_type",
                        serde_json::to_value(quote.quote_type).unwrap_or(serde_json::Value::Null),
                    )
                    .with("importance", quote.importance);
                if let Some(speaker) = &quote.speaker {
                    node = node.with("speaker", speaker.as_str());
                }
                self.node(&mut stats, node).await?;
                self.edge(
                    &mut stats,
                    GraphEdge::new(&unit_id, &quote_id, "CONTAINS_QUOTE"),
                )
                .await?;
            }

            // A theme explored by a unit connects to the entities the unit
            // mentions.
            for entity in &knowledge.entities {
                let Some(canonical) = input
                    .resolution
                    .canonical_for(&knowledge.unit_id, &entity.name)
                else {
                    continue;
                };
                let entity_id = entity_node_id(guid, &canonical.canonical_name);
                for theme in &unit_themes {
                    self.edge(
                        &mut stats,
                        GraphEdge::new(theme_node_id(guid, theme), &entity_id, "CONNECTED_TO"),
                    )
                    .await?;
                }
            }
        }

        tracing::info!(
            guid,
            nodes = stats.nodes,
            edges = stats.edges,
            "episode subgraph written"
        );
        Ok(stats)
    }

    async fn node(&self, stats: &mut WriteStats, node: GraphNode) -> Result<(), GraphError> {
        self.store.upsert_node(node).await?;
        stats.nodes += 1;
        Ok(())
    }

    async fn edge(&self, stats: &mut WriteStats, edge: GraphEdge) -> Result<(), GraphError> {
        self.store.upsert_edge(edge).await?;
        stats.edges += 1;
        Ok(())
    }
}

fn theme_node_id(guid: &str, name: &str) -> String {
    format!("{guid}_theme_{}", slug(name))
}

fn entity_node_id(guid: &str, canonical_name: &str) -> String {
    format!("{guid}_entity_{}", entity_hash(canonical_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_hash_is_stable() {
        assert_eq!(entity_hash("OpenAI"), entity_hash("OpenAI"));
        assert_ne!(entity_hash("OpenAI"), entity_hash("openai"));
        assert_eq!(entity_hash("OpenAI").len(), 16);
    }

    #[test]
    fn theme_ids_are_sluggy() {
        assert_eq!(theme_node_id("g1", "AI & Society"), "g1_theme_ai_society");
    }
}
