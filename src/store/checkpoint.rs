//! Resumable per-episode checkpoints.
//!
//! At most one checkpoint is active at a time (`checkpoints/active.json`);
//! stage artifacts live under `checkpoints/artifacts/<guid>/<stage>.<ext>`.
//! Both transcription and seeding declare their stage sequence at `begin`,
//! and [`CheckpointStore::resume`] computes the earliest stage that still
//! needs work; completed stages with missing artifacts are redone.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::paths::{write_bytes_atomic, write_json_atomic};

/// Stage sequence for the transcription pipeline.
pub const TRANSCRIBE_STAGES: &[&str] = &[
    "download",
    "transcription",
    "continuation",
    "speaker_identification",
    "vtt_generation",
];

/// Stage sequence for the seeding pipeline.
pub const SEEDING_STAGES: &[&str] = &[
    "structure",
    "units",
    "extraction",
    "resolution",
    "graph_write",
];

/// Mid-flight state for one episode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeCheckpoint {
    pub episode_guid: String,
    /// Declared stage order for this pipeline run.
    pub stages: Vec<String>,
    /// Stages already finished, in completion order.
    pub completed: Vec<String>,
    /// Artifact file per completed stage.
    pub artifacts: FxHashMap<String, PathBuf>,
    /// Free-form metadata captured at `begin` (episode record etc.).
    pub meta: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl EpisodeCheckpoint {
    /// Earliest stage that still needs to run: the first stage in declared
    /// order that is either not completed or completed with a missing
    /// artifact file.
    pub fn next_stage(&self) -> Option<&str> {
        for stage in &self.stages {
            let done = self.completed.iter().any(|s| s == stage);
            if !done {
                return Some(stage);
            }
            if let Some(path) = self.artifacts.get(stage) {
                if !path.exists() {
                    tracing::warn!(
                        stage = %stage,
                        path = %path.display(),
                        "checkpoint artifact missing; stage will be redone"
                    );
                    return Some(stage);
                }
            }
        }
        None
    }

    pub fn is_completed(&self, stage: &str) -> bool {
        self.completed.iter().any(|s| s == stage)
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("a checkpoint is already active for episode {guid}")]
    #[diagnostic(
        code(podweave::checkpoint::active_exists),
        help("Complete or abandon the active checkpoint before starting another episode.")
    )]
    ActiveExists { guid: String },

    #[error("no active checkpoint")]
    #[diagnostic(code(podweave::checkpoint::none_active))]
    NoneActive,

    #[error("artifact for stage {stage} is missing at {path}")]
    #[diagnostic(code(podweave::checkpoint::artifact_missing))]
    ArtifactMissing { stage: String, path: PathBuf },

    #[error("checkpoint I/O failed: {source}")]
    #[diagnostic(code(podweave::checkpoint::io))]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// File-backed checkpoint store under a configured directory.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join("active.json")
    }

    fn artifacts_dir(&self, guid: &str) -> PathBuf {
        self.dir
            .join("artifacts")
            .join(crate::text::sanitize_component(guid))
    }

    /// Load the active checkpoint, if any. Corrupt files are discarded.
    pub async fn active(&self) -> Option<EpisodeCheckpoint> {
        let raw = tokio::fs::read_to_string(self.active_path()).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(cp) => Some(cp),
            Err(err) => {
                tracing::warn!(error = %err, "active checkpoint corrupt; discarding");
                None
            }
        }
    }

    /// Start a checkpoint for `guid`. Fails if one is already active.
    pub async fn begin(
        &self,
        guid: &str,
        stages: &[&str],
        meta: serde_json::Value,
    ) -> Result<EpisodeCheckpoint, CheckpointError> {
        if let Some(existing) = self.active().await {
            return Err(CheckpointError::ActiveExists {
                guid: existing.episode_guid,
            });
        }
        let now = Utc::now();
        let checkpoint = EpisodeCheckpoint {
            episode_guid: guid.to_string(),
            stages: stages.iter().map(|s| s.to_string()).collect(),
            completed: Vec::new(),
            artifacts: FxHashMap::default(),
            meta,
            start_time: now,
            last_update: now,
        };
        self.save(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Canonical artifact location for a stage, for producers that stream
    /// their output straight to disk (audio downloads).
    pub fn artifact_path(&self, guid: &str, stage: &str, extension: &str) -> PathBuf {
        self.artifacts_dir(guid).join(format!("{stage}.{extension}"))
    }

    /// Record `stage` as complete with an artifact that already exists on
    /// disk at `path`.
    pub async fn advance_with_existing(
        &self,
        checkpoint: &mut EpisodeCheckpoint,
        stage: &str,
        path: &Path,
    ) -> Result<(), CheckpointError> {
        if !path.exists() {
            return Err(CheckpointError::ArtifactMissing {
                stage: stage.to_string(),
                path: path.to_path_buf(),
            });
        }
        checkpoint.artifacts.insert(stage.to_string(), path.to_path_buf());
        if !checkpoint.is_completed(stage) {
            checkpoint.completed.push(stage.to_string());
        }
        checkpoint.last_update = Utc::now();
        self.save(checkpoint).await
    }

    /// Record `stage` as complete, persisting its artifact (if any) under a
    /// canonical name, and atomically rewrite the checkpoint.
    pub async fn advance(
        &self,
        checkpoint: &mut EpisodeCheckpoint,
        stage: &str,
        artifact: Option<(&str, &[u8])>,
    ) -> Result<(), CheckpointError> {
        if let Some((extension, bytes)) = artifact {
            let path = self
                .artifacts_dir(&checkpoint.episode_guid)
                .join(format!("{stage}.{extension}"));
            write_bytes_atomic(&path, bytes).await?;
            checkpoint.artifacts.insert(stage.to_string(), path);
        }
        if !checkpoint.is_completed(stage) {
            checkpoint.completed.push(stage.to_string());
        }
        checkpoint.last_update = Utc::now();
        self.save(checkpoint).await
    }

    /// Resume from the active checkpoint: the checkpoint plus the earliest
    /// stage that still needs work. `None` when nothing is active or the
    /// checkpoint already covered every stage.
    pub async fn resume(&self) -> Option<(EpisodeCheckpoint, String)> {
        let checkpoint = self.active().await?;
        let stage = checkpoint.next_stage()?.to_string();
        Some((checkpoint, stage))
    }

    /// Read back a stage artifact as UTF-8 text.
    pub async fn read_artifact(
        &self,
        checkpoint: &EpisodeCheckpoint,
        stage: &str,
    ) -> Result<String, CheckpointError> {
        let path = checkpoint
            .artifacts
            .get(stage)
            .ok_or_else(|| CheckpointError::ArtifactMissing {
                stage: stage.to_string(),
                path: self.artifacts_dir(&checkpoint.episode_guid),
            })?;
        tokio::fs::read_to_string(path)
            .await
            .map_err(|_| CheckpointError::ArtifactMissing {
                stage: stage.to_string(),
                path: path.clone(),
            })
    }

    /// Successful completion: delete the checkpoint and its artifacts.
    pub async fn complete(&self, checkpoint: &EpisodeCheckpoint) -> Result<(), CheckpointError> {
        let _ = tokio::fs::remove_file(self.active_path()).await;
        let _ = tokio::fs::remove_dir_all(self.artifacts_dir(&checkpoint.episode_guid)).await;
        Ok(())
    }

    /// Abandon without deleting artifacts (operator may want them).
    pub async fn abandon(&self) -> Result<(), CheckpointError> {
        let _ = tokio::fs::remove_file(self.active_path()).await;
        Ok(())
    }

    async fn save(&self, checkpoint: &EpisodeCheckpoint) -> Result<(), CheckpointError> {
        write_json_atomic(&self.active_path(), checkpoint).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_advance_resume_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut cp = store
            .begin("ep-1", TRANSCRIBE_STAGES, serde_json::json!({"title": "Pilot"}))
            .await
            .unwrap();
        store
            .advance(&mut cp, "download", Some(("mp3", b"audio-bytes")))
            .await
            .unwrap();
        store
            .advance(&mut cp, "transcription", Some(("vtt", b"WEBVTT\n")))
            .await
            .unwrap();

        let (loaded, next) = store.resume().await.unwrap();
        assert_eq!(next, "continuation");
        assert_eq!(loaded.completed, vec!["download", "transcription"]);
        let vtt = store.read_artifact(&loaded, "transcription").await.unwrap();
        assert_eq!(vtt, "WEBVTT\n");

        store.complete(&loaded).await.unwrap();
        assert!(store.active().await.is_none());
    }

    #[tokio::test]
    async fn second_begin_fails_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .begin("ep-1", TRANSCRIBE_STAGES, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(matches!(
            store
                .begin("ep-2", TRANSCRIBE_STAGES, serde_json::Value::Null)
                .await,
            Err(CheckpointError::ActiveExists { .. })
        ));
    }

    #[tokio::test]
    async fn missing_artifact_restarts_earlier_stage() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut cp = store
            .begin("ep-1", TRANSCRIBE_STAGES, serde_json::Value::Null)
            .await
            .unwrap();
        store
            .advance(&mut cp, "download", Some(("mp3", b"audio")))
            .await
            .unwrap();
        store
            .advance(&mut cp, "transcription", Some(("vtt", b"WEBVTT\n")))
            .await
            .unwrap();

        // Delete the transcription artifact behind the store's back.
        std::fs::remove_file(cp.artifacts.get("transcription").unwrap()).unwrap();
        let (_, next) = store.resume().await.unwrap();
        assert_eq!(next, "transcription");
    }

    #[tokio::test]
    async fn corrupt_active_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        std::fs::write(dir.path().join("active.json"), "garbage").unwrap();
        assert!(store.active().await.is_none());
        // A fresh begin overwrites the corpse.
        assert!(
            store
                .begin("ep-1", TRANSCRIBE_STAGES, serde_json::Value::Null)
                .await
                .is_ok()
        );
    }
}
