//! Stage B executor: VTT file → meaningful units → knowledge → graph.
//!
//! The step sequence (structure analysis, regrouping, extraction, entity
//! resolution, graph write) checkpoints after every step, so a crash resumes
//! at the next step without recomputing (or re-paying for) upstream work.
//! The graph write is retried once; idempotent upserts make the retry safe.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::episode::Episode;
use crate::gateway::{GatewayError, LlmGateway};
use crate::graph::{GraphError, GraphStore, GraphWriteInput, GraphWriter, WriteStats};
use crate::store::checkpoint::{CheckpointError, CheckpointStore, EpisodeCheckpoint, SEEDING_STAGES};
use crate::text::sanitize_component;
use crate::vtt::{self, VttDocument, VttError};

use super::analyzer;
use super::extractor;
use super::knowledge::UnitKnowledge;
use super::regrouper;
use super::resolver::{self, ResolutionOutcome};
use super::structure::{ConversationStructure, MeaningfulUnit};

/// What one seeded episode produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedingReport {
    pub episode_guid: String,
    pub episode_title: String,
    pub units: usize,
    pub raw_entities: usize,
    pub canonical_entities: usize,
    pub reduction_ratio: f64,
    pub insights: usize,
    pub quotes: usize,
    pub themes: usize,
    pub nodes_written: usize,
    pub edges_written: usize,
}

#[derive(Debug, Error, Diagnostic)]
pub enum SeedingError {
    #[error("no VTT input found at {path}")]
    #[diagnostic(
        code(podweave::seeding::no_input),
        help("Pass a .vtt file or a directory containing .vtt files.")
    )]
    NoInput { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    #[diagnostic(code(podweave::seeding::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Vtt(#[from] VttError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error("checkpoint artifact for stage {stage} is not valid JSON: {source}")]
    #[diagnostic(code(podweave::seeding::artifact))]
    Artifact {
        stage: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Composes the Stage B pipeline for one episode at a time.
pub struct SeedingExecutor {
    config: Config,
    gateway: Arc<LlmGateway>,
    writer: GraphWriter,
    checkpoints: CheckpointStore,
}

impl SeedingExecutor {
    pub fn new(config: Config, gateway: Arc<LlmGateway>, graph: Arc<dyn GraphStore>) -> Self {
        let checkpoints = CheckpointStore::new(config.checkpoints_dir());
        Self {
            config,
            gateway,
            writer: GraphWriter::new(graph),
            checkpoints,
        }
    }

    /// Seed a single VTT file or every `.vtt` file in a directory.
    pub async fn seed_path(&self, path: &Path) -> Result<Vec<SeedingReport>, SeedingError> {
        let files = collect_vtt_files(path).await?;
        if files.is_empty() {
            return Err(SeedingError::NoInput {
                path: path.to_path_buf(),
            });
        }
        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            reports.push(self.seed_file(&file).await?);
        }
        Ok(reports)
    }

    /// Run the full step sequence for one transcript.
    pub async fn seed_file(&self, path: &Path) -> Result<SeedingReport, SeedingError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SeedingError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let doc = vtt::parse(&raw)?;
        let (guid, episode) = episode_identity(path, &doc);
        tracing::info!(guid = %guid, cues = doc.cues.len(), "seeding transcript");

        let mut checkpoint = self.claim_checkpoint(&guid).await?;

        // 1. Conversation analysis.
        let structure: ConversationStructure = if checkpoint.is_completed("structure") {
            self.load_artifact(&checkpoint, "structure").await?
        } else {
            let structure = analyzer::analyze(&self.gateway, &doc.cues, &episode).await?;
            self.save_artifact(&mut checkpoint, "structure", &structure)
                .await?;
            structure
        };

        // 2. Regrouping.
        let units: Vec<MeaningfulUnit> = if checkpoint.is_completed("units") {
            self.load_artifact(&checkpoint, "units").await?
        } else {
            let units = regrouper::regroup(&doc.cues, &structure);
            self.save_artifact(&mut checkpoint, "units", &units).await?;
            units
        };

        // 3. Per-unit extraction.
        let knowledge: Vec<UnitKnowledge> = if checkpoint.is_completed("extraction") {
            self.load_artifact(&checkpoint, "extraction").await?
        } else {
            let knowledge = extractor::extract_units(&self.gateway, &episode, &units).await;
            self.save_artifact(&mut checkpoint, "extraction", &knowledge)
                .await?;
            knowledge
        };

        // 4. Cross-unit entity resolution.
        let resolution: ResolutionOutcome = if checkpoint.is_completed("resolution") {
            self.load_artifact(&checkpoint, "resolution").await?
        } else {
            let resolution = resolver::resolve(&knowledge);
            self.save_artifact(&mut checkpoint, "resolution", &resolution)
                .await?;
            resolution
        };

        // 5. Graph write, one retry, then keep the checkpoint for the
        // operator.
        let input = GraphWriteInput {
            episode_guid: &guid,
            podcast_name: &episode.podcast_name,
            episode_title: &episode.title,
            episode_date: episode.publication_date,
            structure: &structure,
            units: &units,
            knowledge: &knowledge,
            resolution: &resolution,
        };
        let stats = self.write_with_retry(&input).await?;
        self.checkpoints
            .advance(&mut checkpoint, "graph_write", None)
            .await?;
        self.checkpoints.complete(&checkpoint).await?;

        Ok(report(&guid, &episode, &units, &knowledge, &resolution, stats))
    }

    async fn write_with_retry(
        &self,
        input: &GraphWriteInput<'_>,
    ) -> Result<WriteStats, SeedingError> {
        match self.writer.write_episode(input).await {
            Ok(stats) => Ok(stats),
            Err(first) => {
                tracing::warn!(error = %first, "graph write failed; retrying once");
                self.writer
                    .write_episode(input)
                    .await
                    .map_err(SeedingError::from)
            }
        }
    }

    /// Resume the active checkpoint when it matches this episode and RESUME
    /// is on; otherwise clear it and start fresh.
    async fn claim_checkpoint(&self, guid: &str) -> Result<EpisodeCheckpoint, SeedingError> {
        if let Some(active) = self.checkpoints.active().await {
            if self.config.resume && active.episode_guid == guid {
                tracing::info!(guid, "resuming seeding checkpoint");
                return Ok(active);
            }
            tracing::warn!(
                active = %active.episode_guid,
                "clearing unrelated seeding checkpoint"
            );
            self.checkpoints.abandon().await?;
        }
        Ok(self
            .checkpoints
            .begin(guid, SEEDING_STAGES, serde_json::Value::Null)
            .await?)
    }

    async fn save_artifact<T: Serialize>(
        &self,
        checkpoint: &mut EpisodeCheckpoint,
        stage: &'static str,
        value: &T,
    ) -> Result<(), SeedingError> {
        let body = serde_json::to_vec_pretty(value).map_err(|source| SeedingError::Artifact {
            stage,
            source,
        })?;
        self.checkpoints
            .advance(checkpoint, stage, Some(("json", &body)))
            .await?;
        Ok(())
    }

    async fn load_artifact<T: for<'de> Deserialize<'de>>(
        &self,
        checkpoint: &EpisodeCheckpoint,
        stage: &'static str,
    ) -> Result<T, SeedingError> {
        let raw = self.checkpoints.read_artifact(checkpoint, stage).await?;
        serde_json::from_str(&raw).map_err(|source| SeedingError::Artifact { stage, source })
    }
}

fn report(
    guid: &str,
    episode: &Episode,
    units: &[MeaningfulUnit],
    knowledge: &[UnitKnowledge],
    resolution: &ResolutionOutcome,
    stats: WriteStats,
) -> SeedingReport {
    SeedingReport {
        episode_guid: guid.to_string(),
        episode_title: episode.title.clone(),
        units: units.len(),
        raw_entities: knowledge.iter().map(|k| k.entities.len()).sum(),
        canonical_entities: resolution.canonical.len(),
        reduction_ratio: resolution.reduction_ratio,
        insights: knowledge.iter().map(|k| k.insights.len()).sum(),
        quotes: knowledge.iter().map(|k| k.quotes.len()).sum(),
        themes: units
            .iter()
            .flat_map(|u| u.themes.iter())
            .collect::<std::collections::BTreeSet<_>>()
            .len(),
        nodes_written: stats.nodes,
        edges_written: stats.edges,
    }
}

/// Identity for a transcript: the `NOTE` block's guid when Stage A wrote
/// one, otherwise the sanitized file stem.
fn episode_identity(path: &Path, doc: &VttDocument) -> (String, Episode) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "episode".to_string());
    let guid = doc
        .metadata
        .get("guid")
        .map(str::to_string)
        .unwrap_or_else(|| sanitize_component(&stem));
    let publication_date = doc
        .metadata
        .get("date")
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
    let episode = Episode {
        guid: guid.clone(),
        title: doc
            .metadata
            .get("episode")
            .map(str::to_string)
            .unwrap_or(stem),
        audio_url: String::new(),
        duration_seconds: Some(doc.coverage_end()).filter(|d| *d > 0.0),
        publication_date,
        podcast_name: doc
            .metadata
            .get("podcast")
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown Podcast".to_string()),
        description: None,
    };
    (guid, episode)
}

async fn collect_vtt_files(path: &Path) -> Result<Vec<PathBuf>, SeedingError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|source| SeedingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if meta.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|source| SeedingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    while let Some(entry) = entries.next_entry().await.map_err(|source| SeedingError::Io {
        path: path.to_path_buf(),
        source,
    })? {
        let entry_path = entry.path();
        if entry_path.extension().is_some_and(|e| e == "vtt") {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}
