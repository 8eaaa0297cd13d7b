//! The single choke point for outbound LLM calls.
//!
//! [`LlmGateway`] composes the control plane: every operation leases a key
//! from rotation (which consults quota and breakers), runs the provider call
//! under the retry policy with an operation-level timeout, then settles the
//! reservation: commit with actual token usage on success, cancel on
//! failure. Uploaded audio handles are released on every exit path.

pub mod http_provider;
pub mod prompts;
pub mod provider;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::config::Config;
use crate::episode::Episode;
use crate::quota::{
    CircuitBreakerRegistry, KeyRotationManager, LeasedKey, QuotaTracker, RetryError, RetryPolicy,
    StateFile,
};
use crate::vtt::VttDocument;

use self::provider::{LanguageModel, ModelError, ModelRequest, ModelResponse};

/// Requests a full episode is expected to cost (transcribe + identify
/// speakers). The opening transcription call only leases keys that can still
/// fund this many requests today.
pub const EPISODE_REQUEST_BUDGET: u32 = 2;

/// Conservative token estimates used when the provider reports no usage.
pub const EST_TOKENS_TRANSCRIBE: u64 = 100_000;
pub const EST_TOKENS_CONTINUATION: u64 = 50_000;
pub const EST_TOKENS_SPEAKERS: u64 = 5_000;
pub const EST_TOKENS_EXTRACT: u64 = 8_000;

/// Speaker-identification result: generic label → identified name, with
/// per-label confidence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeakerIdentification {
    pub mappings: FxHashMap<String, String>,
    pub confidence: FxHashMap<String, f64>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    /// Every key's daily request or token budget is spent.
    #[error("daily quota exhausted across all API keys")]
    #[diagnostic(
        code(podweave::gateway::quota_exhausted),
        help("Wait for the local-midnight quota reset or add API keys.")
    )]
    QuotaExhausted,

    /// Every usable key is cooling down behind an open circuit breaker.
    #[error("all API keys unavailable: circuit breakers open")]
    #[diagnostic(
        code(podweave::gateway::circuit_open),
        help("Wait for a breaker recovery window or force-reset the breakers.")
    )]
    CircuitOpen,

    /// The provider call failed terminally (permanent error or retry budget
    /// spent on transients).
    #[error("model call failed: {message}")]
    #[diagnostic(code(podweave::gateway::call_failed))]
    CallFailed { message: String },

    /// The model replied, but not in the shape the operation requires, even
    /// after parse-recovery retries.
    #[error("model returned malformed {expected}: {message}")]
    #[diagnostic(code(podweave::gateway::malformed))]
    Malformed {
        expected: &'static str,
        message: String,
    },
}

impl GatewayError {
    /// True for outcomes that should pause the run rather than fail the
    /// episode.
    pub fn is_quota_stop(&self) -> bool {
        matches!(self, GatewayError::QuotaExhausted)
    }
}

/// Gateway over a [`LanguageModel`] provider, governed by the control plane.
pub struct LlmGateway {
    provider: Arc<dyn LanguageModel>,
    tracker: Arc<QuotaTracker>,
    breakers: Arc<CircuitBreakerRegistry>,
    rotation: KeyRotationManager,
    retry: RetryPolicy,
    timeouts: crate::config::OperationTimeouts,
    key_ids: Vec<usize>,
}

impl LlmGateway {
    pub fn new(config: &Config, provider: Arc<dyn LanguageModel>, state: Arc<StateFile>) -> Self {
        let tracker = Arc::new(QuotaTracker::new(config.quota, state.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit, state.clone()));
        let rotation = KeyRotationManager::new(
            config.api_keys.clone(),
            tracker.clone(),
            breakers.clone(),
            state,
        );
        let key_ids = config.api_keys.iter().map(|k| k.id).collect();
        Self {
            provider,
            tracker,
            breakers,
            rotation,
            retry: RetryPolicy::default(),
            timeouts: config.timeouts,
            key_ids,
        }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.tracker
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// True when some key can still host `requests` more calls today and its
    /// breaker admits attempts. The orchestrator's quota-preservation check.
    pub fn has_key_with_budget(&self, requests: u32) -> bool {
        self.key_ids.iter().any(|&id| {
            self.breakers.can_attempt(id) && self.tracker.requests_remaining_today(id) >= requests
        })
    }

    /// True when at least one key's breaker admits attempts.
    pub fn any_key_attemptable(&self) -> bool {
        self.key_ids.iter().any(|&id| self.breakers.can_attempt(id))
    }

    /// Transcribe a downloaded audio file into WebVTT text.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        episode: &Episode,
    ) -> Result<String, GatewayError> {
        let prompt = prompts::transcription(episode);
        let response = self
            .run_call(
                "transcribe",
                EST_TOKENS_TRANSCRIBE,
                EPISODE_REQUEST_BUDGET,
                self.timeouts.transcription,
                Some(audio_path),
                prompt,
                false,
            )
            .await?;
        Ok(clean_model_text(&response.text))
    }

    /// Ask for cues resuming at (or shortly before) `from_seconds`, with the
    /// tail of `existing` as conversational context.
    pub async fn request_continuation(
        &self,
        audio_path: &Path,
        existing: &VttDocument,
        from_seconds: f64,
        episode: &Episode,
    ) -> Result<String, GatewayError> {
        let prompt = prompts::continuation(episode, from_seconds, &existing.cues);
        let response = self
            .run_call(
                "continuation",
                EST_TOKENS_CONTINUATION,
                1,
                self.timeouts.continuation,
                Some(audio_path),
                prompt,
                false,
            )
            .await?;
        Ok(clean_model_text(&response.text))
    }

    /// Map generic speaker labels to identified names. JSON mode with parse
    /// recovery: malformed responses are retried up to two times.
    pub async fn identify_speakers(
        &self,
        doc: &VttDocument,
        episode: &Episode,
    ) -> Result<SpeakerIdentification, GatewayError> {
        let labels = doc.speaker_labels();
        let sample = sample_dialogue(doc, 20);
        let prompt = prompts::speaker_identification(episode, &labels, &sample);

        let mut last_parse_error = String::new();
        for parse_attempt in 1..=2u32 {
            let response = self
                .run_call(
                    "identify_speakers",
                    EST_TOKENS_SPEAKERS,
                    1,
                    self.timeouts.speaker_identification,
                    None,
                    prompt.clone(),
                    true,
                )
                .await?;
            match parse_speaker_response(&response.text) {
                Ok(identification) => return Ok(identification),
                Err(message) => {
                    tracing::warn!(
                        parse_attempt,
                        error = %message,
                        "speaker identification response unparseable"
                    );
                    last_parse_error = message;
                }
            }
        }
        Err(GatewayError::Malformed {
            expected: "speaker identification JSON",
            message: last_parse_error,
        })
    }

    /// General extraction for the seeding pipeline.
    pub async fn extract(&self, prompt: String, json_mode: bool) -> Result<String, GatewayError> {
        let response = self
            .run_call(
                "extract",
                EST_TOKENS_EXTRACT,
                1,
                self.timeouts.extraction,
                None,
                prompt,
                json_mode,
            )
            .await?;
        Ok(clean_model_text(&response.text))
    }

    /// Lease a key, waiting out per-minute throttling; daily exhaustion and
    /// all-breakers-open surface as typed errors.
    async fn acquire(
        &self,
        estimated_tokens: u64,
        min_requests_remaining: u32,
    ) -> Result<LeasedKey, GatewayError> {
        loop {
            match self
                .rotation
                .get_next_available(estimated_tokens, min_requests_remaining)
            {
                Ok(lease) => return Ok(lease),
                Err(no_key) => {
                    if no_key.all_daily_exhausted() {
                        return Err(GatewayError::QuotaExhausted);
                    }
                    if let Some(wait) = no_key.min_minute_wait() {
                        let wait = wait.min(Duration::from_secs(60)) + Duration::from_millis(250);
                        tracing::info!(
                            wait_ms = wait.as_millis() as u64,
                            "all keys minute-throttled; waiting for window"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Err(GatewayError::CircuitOpen);
                }
            }
        }
    }

    /// One governed provider call: lease → (upload →) generate under retry →
    /// settle reservation and breaker. A quota-exhausted provider error spends
    /// the key's day and rotates to the next key exactly once.
    async fn run_call(
        &self,
        operation: &'static str,
        estimated_tokens: u64,
        min_requests_remaining: u32,
        timeout: Duration,
        audio: Option<&Path>,
        prompt: String,
        json_mode: bool,
    ) -> Result<ModelResponse, GatewayError> {
        let mut quota_rotations = 0u32;
        loop {
            let LeasedKey { key, reservation } = self
                .acquire(estimated_tokens, min_requests_remaining)
                .await?;
            let outcome = self
                .retry
                .run(operation, |_attempt| {
                    let provider = self.provider.clone();
                    let secret = key.secret.clone();
                    let prompt = prompt.clone();
                    let audio = audio.map(Path::to_path_buf);
                    async move {
                        attempt_call(provider, &secret, prompt, audio.as_deref(), json_mode, timeout)
                            .await
                    }
                })
                .await;

            match outcome {
                Ok(response) => {
                    let tokens = response.tokens_used.unwrap_or(estimated_tokens);
                    self.tracker.commit(reservation, tokens).await;
                    self.rotation.mark_key_success(key.id);
                    return Ok(response);
                }
                Err(RetryError::QuotaExhausted(err)) => {
                    tracing::warn!(operation, key_id = key.id, error = %err, "key quota spent; rotating");
                    self.tracker.cancel(reservation);
                    self.tracker.exhaust_day(key.id).await;
                    quota_rotations += 1;
                    if quota_rotations > 1 {
                        return Err(GatewayError::QuotaExhausted);
                    }
                }
                Err(terminal) => {
                    self.tracker.cancel(reservation);
                    self.rotation.mark_key_failure(key.id);
                    return Err(GatewayError::CallFailed {
                        message: terminal.into_inner().to_string(),
                    });
                }
            }
        }
    }
}

/// One attempt: upload audio when present, generate under the timeout, and
/// release the handle whatever happens.
async fn attempt_call(
    provider: Arc<dyn LanguageModel>,
    secret: &str,
    prompt: String,
    audio: Option<&Path>,
    json_mode: bool,
    timeout: Duration,
) -> Result<ModelResponse, ModelError> {
    let handle = match audio {
        Some(path) => Some(provider.upload_audio(secret, path).await?),
        None => None,
    };
    let request = ModelRequest {
        prompt,
        audio: handle.clone(),
        json_mode,
    };
    let result = tokio::time::timeout(timeout, provider.generate(secret, request)).await;
    if let Some(handle) = &handle {
        if let Err(err) = provider.delete_audio(secret, handle).await {
            tracing::warn!(error = %err, "failed to release uploaded audio handle");
        }
    }
    match result {
        Ok(inner) => inner,
        Err(_) => Err(ModelError::Timeout { timeout }),
    }
}

/// Strip markdown code fences models like to wrap output in.
pub fn clean_model_text(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (e.g. ```json) and the closing fence.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.trim_end()
        .trim_end_matches("```")
        .trim()
        .to_string()
}

/// First `n` cues rendered as dialogue lines for the speaker prompt.
fn sample_dialogue(doc: &VttDocument, n: usize) -> String {
    doc.cues
        .iter()
        .take(n)
        .map(|cue| {
            format!(
                "{}: {}",
                cue.speaker.as_deref().unwrap_or("UNKNOWN"),
                cue.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct RawSpeakerResponse {
    speaker_mappings: FxHashMap<String, String>,
    #[serde(default)]
    confidence_scores: FxHashMap<String, f64>,
}

fn parse_speaker_response(text: &str) -> Result<SpeakerIdentification, String> {
    let cleaned = clean_model_text(text);
    let raw: RawSpeakerResponse =
        serde_json::from_str(&cleaned).map_err(|err| err.to_string())?;
    let mut identification = SpeakerIdentification {
        confidence: raw.confidence_scores,
        mappings: raw.speaker_mappings,
    };
    // Every mapped speaker gets a confidence; unreported ones default to 0.5.
    for label in identification.mappings.keys() {
        identification
            .confidence
            .entry(label.clone())
            .or_insert(0.5);
    }
    Ok(identification)
}
