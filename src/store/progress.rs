//! Per-episode processing state, persisted as one JSON document.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::episode::Episode;
use crate::store::paths::{read_json_or_default, write_json_atomic};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Processing state for one episode guid.
///
/// Invariants: `attempt_count` is monotonic; `Completed` implies
/// `output_path` points at a file that exists on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeProgress {
    pub episode: Episode,
    pub status: EpisodeStatus,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcribed_seconds: Option<f64>,
    pub last_update: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ProgressDocument {
    episodes: FxHashMap<String, EpisodeProgress>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ProgressError {
    #[error("unknown episode guid: {guid}")]
    #[diagnostic(
        code(podweave::progress::unknown_guid),
        help("Call add_episode before updating an episode's status.")
    )]
    UnknownGuid { guid: String },

    #[error("failed to persist progress state: {source}")]
    #[diagnostic(code(podweave::progress::io))]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// The `.progress.json` store. Every mutation persists atomically.
pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<ProgressDocument>,
}

impl ProgressStore {
    /// Load existing progress from `path`; missing or corrupt files start
    /// empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state: ProgressDocument = read_json_or_default(&path).await;
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Register a feed episode if it is not already tracked.
    pub async fn add_episode(&self, episode: &Episode) -> Result<(), ProgressError> {
        let inserted = self.with(|doc| {
            if doc.episodes.contains_key(&episode.guid) {
                return false;
            }
            doc.episodes.insert(
                episode.guid.clone(),
                EpisodeProgress {
                    episode: episode.clone(),
                    status: EpisodeStatus::Pending,
                    attempt_count: 0,
                    last_error: None,
                    error_category: None,
                    output_path: None,
                    transcribed_seconds: None,
                    last_update: Utc::now(),
                },
            );
            true
        });
        if inserted {
            self.persist().await?;
        }
        Ok(())
    }

    pub fn get(&self, guid: &str) -> Option<EpisodeProgress> {
        self.with(|doc| doc.episodes.get(guid).cloned())
    }

    /// Guids still worth attempting: pending, or failed with attempts left.
    /// The caller supplies feed order; this only answers membership.
    pub fn is_pending(&self, guid: &str, max_attempts: u32) -> bool {
        self.with(|doc| record_is_pending(doc, guid, max_attempts))
    }

    /// All tracked progress records, for reporting.
    pub fn all(&self) -> Vec<EpisodeProgress> {
        self.with(|doc| doc.episodes.values().cloned().collect())
    }

    /// Guids of episodes still worth attempting, ordered by guid. Callers
    /// that care about feed order should filter the feed through
    /// [`is_pending`](Self::is_pending) instead.
    pub fn get_pending(&self, max_attempts: u32) -> Vec<String> {
        let mut guids: Vec<String> = self.with(|doc| {
            doc.episodes
                .keys()
                .filter(|guid| record_is_pending(doc, guid, max_attempts))
                .cloned()
                .collect()
        });
        guids.sort();
        guids
    }

    pub async fn mark_started(&self, guid: &str) -> Result<(), ProgressError> {
        self.update(guid, |p| {
            p.status = EpisodeStatus::InProgress;
            p.attempt_count += 1;
        })
        .await
    }

    pub async fn mark_completed(
        &self,
        guid: &str,
        output_path: &Path,
        transcribed_seconds: f64,
    ) -> Result<(), ProgressError> {
        self.update(guid, |p| {
            p.status = EpisodeStatus::Completed;
            p.output_path = Some(output_path.to_path_buf());
            p.transcribed_seconds = Some(transcribed_seconds);
            p.last_error = None;
            p.error_category = None;
        })
        .await
    }

    pub async fn mark_failed(
        &self,
        guid: &str,
        reason: &str,
        category: &str,
    ) -> Result<(), ProgressError> {
        self.update(guid, |p| {
            p.status = EpisodeStatus::Failed;
            p.last_error = Some(reason.to_string());
            p.error_category = Some(category.to_string());
        })
        .await
    }

    /// Return an in-progress episode to pending (quota-skip path: the episode
    /// was not attempted to completion and must not burn an attempt).
    pub async fn mark_skipped(&self, guid: &str) -> Result<(), ProgressError> {
        self.update(guid, |p| {
            p.status = EpisodeStatus::Pending;
            p.attempt_count = p.attempt_count.saturating_sub(1);
        })
        .await
    }

    async fn update(
        &self,
        guid: &str,
        f: impl FnOnce(&mut EpisodeProgress),
    ) -> Result<(), ProgressError> {
        let found = self.with(|doc| match doc.episodes.get_mut(guid) {
            Some(p) => {
                f(p);
                p.last_update = Utc::now();
                true
            }
            None => false,
        });
        if !found {
            return Err(ProgressError::UnknownGuid {
                guid: guid.to_string(),
            });
        }
        self.persist().await
    }

    fn with<R>(&self, f: impl FnOnce(&mut ProgressDocument) -> R) -> R {
        let mut guard = self.state.lock().expect("progress lock poisoned");
        f(&mut guard)
    }

    async fn persist(&self) -> Result<(), ProgressError> {
        let snapshot = self.with(|doc| doc.clone());
        write_json_atomic(&self.path, &snapshot).await?;
        Ok(())
    }
}

fn record_is_pending(doc: &ProgressDocument, guid: &str, max_attempts: u32) -> bool {
    match doc.episodes.get(guid) {
        None => true,
        Some(p) => match p.status {
            EpisodeStatus::Completed => false,
            EpisodeStatus::Failed | EpisodeStatus::Pending | EpisodeStatus::InProgress => {
                p.attempt_count < max_attempts
            }
        },
    }
}
