//! The per-episode transcription state machine.
//!
//! Episodes run strictly sequentially: download → transcribe → continuation
//! loop → speaker identification → VTT emission, with a resumable checkpoint
//! advanced at every stage boundary. Quota preservation skips episodes the
//! daily budget cannot finish; quota exhaustion mid-episode keeps the
//! checkpoint so the next run resumes without re-spending requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::episode::{Episode, EpisodeFeed, FeedError};
use crate::gateway::{GatewayError, LlmGateway};
use crate::shutdown::ShutdownSignal;
use crate::store::checkpoint::{CheckpointError, CheckpointStore, EpisodeCheckpoint, TRANSCRIBE_STAGES};
use crate::store::paths::write_json_atomic;
use crate::store::progress::{ProgressError, ProgressStore};
use crate::text::sanitize_component;
use crate::vtt::{self, VttDocument, stitch_cues};

use super::audio::AudioFetcher;
use super::index::{EpisodeRecord, MetadataIndex};
use super::speakers::{self, SpeakerResolution};

/// Requests an episode is expected to cost (transcribe + identify speakers);
/// the quota-preservation rule skips episodes the remaining budget cannot
/// cover.
pub const EXPECTED_ATTEMPTS_PER_EPISODE: u32 = 2;

/// Attempts before an episode is no longer offered for processing.
pub const MAX_EPISODE_ATTEMPTS: u32 = 3;

const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Outcome of the continuation loop for one episode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ContinuationInfo {
    pub attempts: u32,
    pub final_ratio: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Skipped,
}

/// Per-episode entry in the run summary.
#[derive(Clone, Debug, Serialize)]
pub struct EpisodeOutcome {
    pub guid: String,
    pub title: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<ContinuationInfo>,
}

/// Structured result of one orchestrator run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub quota_reached: bool,
    /// A shutdown signal stopped the run; checkpoints were persisted.
    pub interrupted: bool,
    pub episodes: Vec<EpisodeOutcome>,
}

impl RunSummary {
    fn record(&mut self, outcome: EpisodeOutcome) {
        match outcome.status {
            OutcomeStatus::Completed => self.processed += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
        match outcome.reason.as_deref() {
            Some("quota") | Some("quota_preserved") => self.quota_reached = true,
            Some("interrupted") => self.interrupted = true,
            _ => {}
        }
        self.episodes.push(outcome);
    }

    fn attempted(&self) -> u32 {
        self.processed + self.failed
    }

    /// Process exit code: 0 success, 1 all attempted episodes failed,
    /// 2 quota or circuit stop with clean state, 130 interrupted.
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            return 130;
        }
        let blocked = self.quota_reached
            || self.episodes.iter().any(|e| {
                e.status == OutcomeStatus::Skipped
                    && matches!(e.reason.as_deref(), Some("circuit_open"))
            });
        if blocked {
            2
        } else if self.failed > 0 && self.processed == 0 {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to serialize episode metadata: {source}")]
    #[diagnostic(code(podweave::orchestrator::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// How one episode's drive ended, before progress bookkeeping.
enum EpisodeRun {
    Completed {
        output: PathBuf,
        coverage_seconds: f64,
        speakers: Vec<String>,
        continuation: Option<ContinuationInfo>,
    },
    Failed {
        reason: String,
        category: &'static str,
    },
    /// Daily quota ran out. `keep_checkpoint` preserves mid-flight work for
    /// a resumed run; a skip before any model spend releases it.
    SkippedQuota {
        keep_checkpoint: bool,
    },
    SkippedCircuit,
    /// A shutdown signal arrived at a stage boundary; the checkpoint stays
    /// for a resumed run.
    Interrupted,
}

/// Drives the per-episode state machine over the gateway and stores.
pub struct TranscriptionOrchestrator {
    config: Config,
    gateway: Arc<LlmGateway>,
    fetcher: Arc<dyn AudioFetcher>,
    progress: Arc<ProgressStore>,
    checkpoints: CheckpointStore,
    index: Arc<MetadataIndex>,
    shutdown: ShutdownSignal,
}

impl TranscriptionOrchestrator {
    pub fn new(
        config: Config,
        gateway: Arc<LlmGateway>,
        fetcher: Arc<dyn AudioFetcher>,
        progress: Arc<ProgressStore>,
        index: Arc<MetadataIndex>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let checkpoints = CheckpointStore::new(config.checkpoints_dir());
        Self {
            config,
            gateway,
            fetcher,
            progress,
            checkpoints,
            index,
            shutdown,
        }
    }

    /// Process a feed: admit episodes, resume any active checkpoint, then
    /// drive pending episodes in feed order until done, capped, or stopped.
    pub async fn run(&self, feed: &dyn EpisodeFeed) -> Result<RunSummary, OrchestratorError> {
        let episodes = feed.fetch().await?;
        tracing::info!(count = episodes.len(), "feed fetched");
        for episode in &episodes {
            self.progress.add_episode(episode).await?;
        }

        let mut summary = RunSummary::default();
        let mut resume_checkpoint = self.take_resumable(&episodes, &mut summary).await?;

        for episode in &episodes {
            if summary.attempted() as usize >= self.config.max_episodes_per_run {
                tracing::info!(
                    max = self.config.max_episodes_per_run,
                    "episode cap reached; stopping"
                );
                break;
            }
            if self.shutdown.is_triggered() {
                tracing::info!("shutdown requested; stopping before next episode");
                summary.interrupted = true;
                break;
            }
            if !self.progress.is_pending(&episode.guid, MAX_EPISODE_ATTEMPTS) {
                continue;
            }

            if !self.gateway.any_key_attemptable() {
                tracing::warn!(guid = %episode.guid, "all circuit breakers open; skipping");
                summary.record(skip_outcome(episode, "circuit_open"));
                continue;
            }
            if !self.gateway.has_key_with_budget(EXPECTED_ATTEMPTS_PER_EPISODE) {
                tracing::warn!(
                    guid = %episode.guid,
                    "no key can fund a full episode today; preserving quota"
                );
                summary.record(skip_outcome(episode, "quota_preserved"));
                continue;
            }

            let checkpoint =
                resume_checkpoint.take_if(|cp| cp.episode_guid == episode.guid);
            let outcome = self.run_one(episode, checkpoint).await?;
            summary.record(outcome);
        }

        let summary_path = self.config.data_dir.join(".last_run_summary.json");
        if let Err(err) = write_json_atomic(&summary_path, &summary).await {
            tracing::warn!(error = %err, "failed to persist run summary");
        }
        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            quota_reached = summary.quota_reached,
            "run finished"
        );
        Ok(summary)
    }

    /// Claim the active checkpoint for this run, or clear it. An episode no
    /// longer in the feed is resumed immediately from its recorded metadata.
    async fn take_resumable(
        &self,
        episodes: &[Episode],
        summary: &mut RunSummary,
    ) -> Result<Option<EpisodeCheckpoint>, OrchestratorError> {
        let Some(active) = self.checkpoints.active().await else {
            return Ok(None);
        };
        if !self.config.resume {
            tracing::warn!(
                guid = %active.episode_guid,
                "active checkpoint found but RESUME is off; abandoning"
            );
            self.checkpoints.abandon().await?;
            return Ok(None);
        }
        if episodes.iter().any(|e| e.guid == active.episode_guid) {
            if !self
                .progress
                .is_pending(&active.episode_guid, MAX_EPISODE_ATTEMPTS)
            {
                tracing::warn!(
                    guid = %active.episode_guid,
                    "checkpointed episode is no longer pending; abandoning checkpoint"
                );
                self.checkpoints.abandon().await?;
                return Ok(None);
            }
            tracing::info!(guid = %active.episode_guid, "resuming from active checkpoint");
            return Ok(Some(active));
        }
        tracing::info!(guid = %active.episode_guid, "resuming checkpoint for episode outside the feed");
        match serde_json::from_value::<Episode>(active.meta.clone()) {
            Ok(episode) => {
                self.progress.add_episode(&episode).await?;
                let outcome = self.run_one(&episode, Some(active)).await?;
                summary.record(outcome);
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(error = %err, "checkpoint metadata unreadable; abandoning");
                self.checkpoints.abandon().await?;
                Ok(None)
            }
        }
    }

    /// Run one episode to a terminal outcome, with progress and checkpoint
    /// bookkeeping.
    async fn run_one(
        &self,
        episode: &Episode,
        resumed: Option<EpisodeCheckpoint>,
    ) -> Result<EpisodeOutcome, OrchestratorError> {
        tracing::info!(guid = %episode.guid, title = %episode.title, "processing episode");
        self.progress.mark_started(&episode.guid).await?;

        let mut checkpoint = match resumed {
            Some(mut cp) => {
                redo_from_missing(&mut cp);
                cp
            }
            None => {
                self.checkpoints
                    .begin(
                        &episode.guid,
                        TRANSCRIBE_STAGES,
                        serde_json::to_value(episode)?,
                    )
                    .await?
            }
        };

        let run = self.drive(episode, &mut checkpoint).await?;
        let outcome = match run {
            EpisodeRun::Completed {
                output,
                coverage_seconds,
                speakers,
                continuation,
            } => {
                self.progress
                    .mark_completed(&episode.guid, &output, coverage_seconds)
                    .await?;
                let record = EpisodeRecord {
                    guid: episode.guid.clone(),
                    podcast: episode.podcast_name.clone(),
                    title: episode.title.clone(),
                    date: episode.publication_date.map(|d| d.date_naive()),
                    speakers,
                    transcribed_seconds: coverage_seconds,
                    output_path: output.clone(),
                    added: Utc::now(),
                };
                if let Err(err) = self.index.add_episode(record).await {
                    tracing::warn!(error = %err, "metadata index update failed");
                }
                self.checkpoints.complete(&checkpoint).await?;
                EpisodeOutcome {
                    guid: episode.guid.clone(),
                    title: episode.title.clone(),
                    status: OutcomeStatus::Completed,
                    reason: None,
                    output_path: Some(output),
                    continuation,
                }
            }
            EpisodeRun::Failed { reason, category } => {
                tracing::error!(guid = %episode.guid, category, error = %reason, "episode failed");
                self.progress
                    .mark_failed(&episode.guid, &reason, category)
                    .await?;
                // Release the active slot; stage artifacts stay on disk for
                // the operator.
                self.checkpoints.abandon().await?;
                EpisodeOutcome {
                    guid: episode.guid.clone(),
                    title: episode.title.clone(),
                    status: OutcomeStatus::Failed,
                    reason: Some(reason),
                    output_path: None,
                    continuation: None,
                }
            }
            EpisodeRun::SkippedQuota { keep_checkpoint } => {
                self.progress.mark_skipped(&episode.guid).await?;
                if !keep_checkpoint {
                    self.checkpoints.abandon().await?;
                }
                skip_outcome(episode, "quota")
            }
            EpisodeRun::SkippedCircuit => {
                self.progress.mark_skipped(&episode.guid).await?;
                self.checkpoints.abandon().await?;
                skip_outcome(episode, "circuit_open")
            }
            EpisodeRun::Interrupted => {
                tracing::info!(guid = %episode.guid, "interrupted; checkpoint kept for resume");
                self.progress.mark_skipped(&episode.guid).await?;
                skip_outcome(episode, "interrupted")
            }
        };
        Ok(outcome)
    }

    /// The stage sequence proper. Completed stages are skipped by loading
    /// their artifacts.
    async fn drive(
        &self,
        episode: &Episode,
        cp: &mut EpisodeCheckpoint,
    ) -> Result<EpisodeRun, OrchestratorError> {
        // Download.
        let audio_path = self
            .checkpoints
            .artifact_path(&episode.guid, "download", "mp3");
        if !cp.is_completed("download") {
            if let Err(reason) = self.download_with_retry(&episode.audio_url, &audio_path).await {
                return Ok(EpisodeRun::Failed {
                    reason,
                    category: "download",
                });
            }
            self.checkpoints
                .advance_with_existing(cp, "download", &audio_path)
                .await?;
        }
        let audio_path = cp
            .artifacts
            .get("download")
            .cloned()
            .unwrap_or(audio_path);
        if self.shutdown.is_triggered() {
            return Ok(EpisodeRun::Interrupted);
        }

        // Transcription.
        let vtt_text = if cp.is_completed("transcription") {
            self.checkpoints.read_artifact(cp, "transcription").await?
        } else {
            match self.gateway.transcribe(&audio_path, episode).await {
                Ok(text) => {
                    let text = ensure_vtt_header(&text);
                    self.checkpoints
                        .advance(cp, "transcription", Some(("vtt", text.as_bytes())))
                        .await?;
                    text
                }
                Err(GatewayError::QuotaExhausted) => {
                    return Ok(EpisodeRun::SkippedQuota {
                        keep_checkpoint: false,
                    });
                }
                Err(GatewayError::CircuitOpen) => return Ok(EpisodeRun::SkippedCircuit),
                Err(err) => {
                    return Ok(EpisodeRun::Failed {
                        reason: err.to_string(),
                        category: "transcription",
                    });
                }
            }
        };

        if self.shutdown.is_triggered() {
            return Ok(EpisodeRun::Interrupted);
        }

        let mut doc = match vtt::parse(&vtt_text) {
            Ok(doc) => doc,
            Err(err) => {
                return Ok(EpisodeRun::Failed {
                    reason: format!("transcript unparseable: {err}"),
                    category: "transcript_parse",
                });
            }
        };

        // Coverage validation and continuation.
        let mut continuation = None;
        if cp.is_completed("continuation") {
            if let Ok(text) = self.checkpoints.read_artifact(cp, "continuation").await {
                if let Ok(stitched) = vtt::parse(&text) {
                    doc = stitched;
                }
            }
        } else {
            if let Some(duration) = episode.duration_seconds.filter(|d| *d > 0.0) {
                let info = self
                    .continuation_loop(episode, &audio_path, &mut doc, duration)
                    .await;
                tracing::info!(
                    guid = %episode.guid,
                    attempts = info.attempts,
                    final_ratio = info.final_ratio,
                    "coverage validated"
                );
                continuation = Some(info);
            }
            let rendered = vtt::render(&doc);
            self.checkpoints
                .advance(cp, "continuation", Some(("vtt", rendered.as_bytes())))
                .await?;
        }
        if self.shutdown.is_triggered() {
            return Ok(EpisodeRun::Interrupted);
        }

        // Speaker identification.
        let resolution = if cp.is_completed("speaker_identification") {
            let raw = self
                .checkpoints
                .read_artifact(cp, "speaker_identification")
                .await?;
            serde_json::from_str(&raw)
                .map(|names| SpeakerResolution {
                    names,
                    identified: true,
                })
                .unwrap_or_default()
        } else {
            match speakers::resolve(&self.gateway, &doc, episode).await {
                Ok(resolution) => {
                    // Stable key order keeps resumed runs byte-identical.
                    let names: std::collections::BTreeMap<_, _> =
                        resolution.names.clone().into_iter().collect();
                    let body = serde_json::to_vec(&names)?;
                    self.checkpoints
                        .advance(cp, "speaker_identification", Some(("json", &body)))
                        .await?;
                    resolution
                }
                Err(GatewayError::QuotaExhausted) => {
                    return Ok(EpisodeRun::SkippedQuota {
                        keep_checkpoint: true,
                    });
                }
                Err(err) => {
                    // resolve() degrades everything else internally.
                    tracing::warn!(error = %err, "unexpected speaker resolution error");
                    SpeakerResolution::default()
                }
            }
        };
        speakers::apply(&mut doc, &resolution);

        // VTT emission.
        let speaker_names = doc.speaker_labels();
        doc.metadata = vtt::generation_metadata(
            &episode.podcast_name,
            &episode.title,
            episode.publication_date,
            &speaker_names,
        );
        // The seeding pipeline recovers episode identity from the NOTE block.
        doc.metadata.insert("guid", episode.guid.clone());
        let output = self.output_path(episode);
        if let Err(err) = vtt::write_to(&output, &doc).await {
            return Ok(EpisodeRun::Failed {
                reason: format!("failed to write VTT: {err}"),
                category: "vtt_write",
            });
        }
        self.checkpoints.advance(cp, "vtt_generation", None).await?;

        Ok(EpisodeRun::Completed {
            output,
            coverage_seconds: doc.coverage_end(),
            speakers: speaker_names,
            continuation,
        })
    }

    /// Request continuation fragments until coverage clears the threshold or
    /// the attempt budget runs out. Gateway failures end the loop; the
    /// transcript so far is kept best-effort.
    async fn continuation_loop(
        &self,
        episode: &Episode,
        audio_path: &Path,
        doc: &mut VttDocument,
        duration: f64,
    ) -> ContinuationInfo {
        let cov = self.config.coverage;
        let mut attempts = 0u32;
        while doc.coverage_end() / duration < cov.min_ratio && attempts < cov.max_continuations {
            let from = (doc.coverage_end() - cov.request_overlap_seconds).max(0.0);
            tracing::info!(
                guid = %episode.guid,
                coverage = doc.coverage_end(),
                duration,
                from,
                "coverage short; requesting continuation"
            );
            let fragment_text = match self
                .gateway
                .request_continuation(audio_path, doc, from, episode)
                .await
            {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "continuation unavailable; keeping best-effort transcript");
                    break;
                }
            };
            attempts += 1;
            match vtt::parse(&ensure_vtt_header(&fragment_text)) {
                Ok(fragment) if !fragment.cues.is_empty() => {
                    doc.cues = stitch_cues(
                        vec![std::mem::take(&mut doc.cues), fragment.cues],
                        cov.stitch_overlap_seconds,
                    );
                }
                Ok(_) => {
                    tracing::warn!("continuation returned no cues; stopping");
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "continuation fragment unparseable; stopping");
                    break;
                }
            }
        }
        ContinuationInfo {
            attempts,
            final_ratio: doc.coverage_end() / duration,
        }
    }

    async fn download_with_retry(&self, url: &str, dest: &Path) -> Result<(), String> {
        let policy = crate::quota::RetryPolicy::default();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetcher.fetch(url, dest).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < DOWNLOAD_ATTEMPTS => {
                    let delay = policy.backoff_delay(attempt);
                    tracing::warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "download failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.to_string()),
            }
        }
    }

    /// Deterministic output location:
    /// `<output>/<podcast>/<YYYY-MM-DD>_<title>.vtt`.
    fn output_path(&self, episode: &Episode) -> PathBuf {
        let date = episode
            .publication_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string());
        self.config
            .output_dir
            .join(sanitize_component(&episode.podcast_name))
            .join(format!(
                "{date}_{}.vtt",
                sanitize_component(&episode.title)
            ))
    }
}

fn skip_outcome(episode: &Episode, reason: &str) -> EpisodeOutcome {
    EpisodeOutcome {
        guid: episode.guid.clone(),
        title: episode.title.clone(),
        status: OutcomeStatus::Skipped,
        reason: Some(reason.to_string()),
        output_path: None,
        continuation: None,
    }
}

/// Drop completed stages at and after the earliest one whose artifact went
/// missing, so the drive loop redoes them.
fn redo_from_missing(cp: &mut EpisodeCheckpoint) {
    if let Some(next) = cp.next_stage().map(str::to_string) {
        let keep: Vec<String> = cp
            .stages
            .iter()
            .take_while(|s| **s != next)
            .cloned()
            .collect();
        cp.completed.retain(|s| keep.contains(s));
    }
}

/// Models sometimes omit the header on fragments; the parser requires it.
fn ensure_vtt_header(text: &str) -> String {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("WEBVTT") {
        text.to_string()
    } else {
        format!("WEBVTT\n\n{trimmed}")
    }
}

/// Time from `now` until the next local midnight plus a settling buffer.
/// Used by operators scheduling a resumed run after daily quota resets.
pub fn time_until_quota_reset(now: DateTime<Local>) -> Duration {
    const BUFFER: Duration = Duration::from_secs(5 * 60);
    let Some(tomorrow) = now.date_naive().succ_opt() else {
        return BUFFER;
    };
    let midnight = tomorrow.and_hms_opt(0, 0, 0).expect("midnight is valid");
    let target = match Local.from_local_datetime(&midnight) {
        chrono::LocalResult::Single(t) => t,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => return BUFFER,
    };
    (target - now).to_std().unwrap_or_default() + BUFFER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_contract() {
        let mut ok = RunSummary::default();
        ok.record(EpisodeOutcome {
            guid: "a".into(),
            title: "A".into(),
            status: OutcomeStatus::Completed,
            reason: None,
            output_path: None,
            continuation: None,
        });
        assert_eq!(ok.exit_code(), 0);

        let mut all_failed = RunSummary::default();
        all_failed.record(EpisodeOutcome {
            guid: "a".into(),
            title: "A".into(),
            status: OutcomeStatus::Failed,
            reason: Some("boom".into()),
            output_path: None,
            continuation: None,
        });
        assert_eq!(all_failed.exit_code(), 1);

        let mut quota = RunSummary::default();
        quota.record(EpisodeOutcome {
            guid: "a".into(),
            title: "A".into(),
            status: OutcomeStatus::Skipped,
            reason: Some("quota_preserved".into()),
            output_path: None,
            continuation: None,
        });
        assert_eq!(quota.exit_code(), 2);
        assert!(quota.quota_reached);
    }

    #[test]
    fn empty_summary_exits_clean() {
        assert_eq!(RunSummary::default().exit_code(), 0);
    }

    #[test]
    fn quota_reset_wait_is_bounded_by_a_day() {
        let wait = time_until_quota_reset(Local::now());
        assert!(wait <= Duration::from_secs(24 * 3600 + 5 * 60));
        assert!(wait >= Duration::from_secs(5 * 60));
    }

    #[test]
    fn header_is_ensured() {
        assert!(ensure_vtt_header("00:00:00.000 --> 00:00:01.000\nhi").starts_with("WEBVTT"));
        let already = "WEBVTT\n\ncue";
        assert_eq!(ensure_vtt_header(already), already);
    }
}
