//! Shared fixtures: a scriptable mock provider, fetchers, and a harness
//! that wires the gateway, stores and orchestrator over a temp directory.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use podweave::config::{ApiKey, Config};
use podweave::episode::{Episode, EpisodeFeed, FeedError};
use podweave::gateway::LlmGateway;
use podweave::gateway::provider::{
    AudioHandle, LanguageModel, ModelError, ModelRequest, ModelResponse,
};
use podweave::quota::StateFile;
use podweave::shutdown::ShutdownSignal;
use podweave::store::ProgressStore;
use podweave::transcribe::{AudioError, AudioFetcher, MetadataIndex, TranscriptionOrchestrator};

/// Which gateway operation a generate request belongs to, recovered from the
/// prompt builders' fixed openings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Transcribe,
    Continuation,
    Speakers,
    Analysis,
    Extraction,
}

fn classify_prompt(prompt: &str) -> Op {
    if prompt.starts_with("Transcribe this podcast") {
        Op::Transcribe
    } else if prompt.starts_with("Continue transcribing") {
        Op::Continuation
    } else if prompt.starts_with("Identify the speakers") {
        Op::Speakers
    } else if prompt.starts_with("Analyze the structure") {
        Op::Analysis
    } else {
        Op::Extraction
    }
}

/// Deterministic provider: per-operation response queues with sensible
/// canned fallbacks, plus call and upload accounting.
#[derive(Default)]
pub struct MockModel {
    queues: Mutex<std::collections::HashMap<&'static str, VecDeque<Result<String, String>>>>,
    pub calls: Mutex<Vec<Op>>,
    pub uploads: AtomicUsize,
    pub deletes: AtomicUsize,
}

fn op_key(op: Op) -> &'static str {
    match op {
        Op::Transcribe => "transcribe",
        Op::Continuation => "continuation",
        Op::Speakers => "speakers",
        Op::Analysis => "analysis",
        Op::Extraction => "extraction",
    }
}

impl MockModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful response for an operation.
    pub fn respond(&self, op: Op, body: &str) {
        self.queues
            .lock()
            .unwrap()
            .entry(op_key(op))
            .or_default()
            .push_back(Ok(body.to_string()));
    }

    /// Queue a provider error; the message drives retry classification.
    pub fn fail(&self, op: Op, message: &str) {
        self.queues
            .lock()
            .unwrap()
            .entry(op_key(op))
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn calls_of(&self, op: Op) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    fn canned(op: Op) -> String {
        match op {
            Op::Transcribe => two_speaker_vtt(60.0),
            Op::Continuation => String::new(),
            Op::Speakers => r#"{"speaker_mappings": {"SPEAKER_1": "Alice", "SPEAKER_2": "Bob"},
                "confidence_scores": {"SPEAKER_1": 0.9, "SPEAKER_2": 0.9}}"#
                .to_string(),
            Op::Analysis => r#"{"themes": [{"name": "General", "description": "the conversation"}],
                "units": [{"start_index": 0, "end_index": 9999, "unit_type": "discussion", "summary": "all of it"}],
                "narrative_arc": "flat", "coherence_score": 0.5}"#
                .to_string(),
            Op::Extraction => r#"{"entities": [], "insights": [], "quotes": [], "relationships": [], "themes": []}"#
                .to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn upload_audio(&self, _api_key: &str, path: &Path) -> Result<AudioHandle, ModelError> {
        if !path.exists() {
            return Err(ModelError::Upload {
                message: format!("missing audio file {}", path.display()),
            });
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(AudioHandle {
            id: format!("upload-{n}"),
        })
    }

    async fn delete_audio(&self, _api_key: &str, _handle: &AudioHandle) -> Result<(), ModelError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn generate(
        &self,
        _api_key: &str,
        request: ModelRequest,
    ) -> Result<ModelResponse, ModelError> {
        let op = classify_prompt(&request.prompt);
        self.calls.lock().unwrap().push(op);
        let scripted = self
            .queues
            .lock()
            .unwrap()
            .get_mut(op_key(op))
            .and_then(|q| q.pop_front());
        match scripted {
            Some(Ok(text)) => Ok(ModelResponse {
                text,
                tokens_used: Some(1_000),
            }),
            Some(Err(message)) => Err(ModelError::Call { message }),
            None => Ok(ModelResponse {
                text: Self::canned(op),
                tokens_used: Some(1_000),
            }),
        }
    }
}

/// Fetcher that writes fixed bytes, optionally failing the first N calls.
pub struct StubFetcher {
    pub fail_first: AtomicU32,
    pub fetches: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_first: AtomicU32::new(0),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn failing_first(n: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first: AtomicU32::new(n),
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AudioFetcher for StubFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), AudioError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AudioError::Download {
                url: url.to_string(),
                message: "connection reset by peer".to_string(),
            });
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, b"fake-audio-bytes").await?;
        Ok(())
    }
}

/// In-memory feed with a fixed episode list.
pub struct StaticFeed {
    pub episodes: Vec<Episode>,
}

#[async_trait]
impl EpisodeFeed for StaticFeed {
    async fn fetch(&self) -> Result<Vec<Episode>, FeedError> {
        Ok(self.episodes.clone())
    }
}

/// One wired test environment over a temp directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: Config,
    pub model: Arc<MockModel>,
    pub state: Arc<StateFile>,
    pub gateway: Arc<LlmGateway>,
    pub progress: Arc<ProgressStore>,
    pub index: Arc<MetadataIndex>,
}

impl Harness {
    pub async fn new(key_count: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let keys: Vec<ApiKey> = (0..key_count)
            .map(|id| ApiKey {
                id,
                secret: format!("test-key-{id}"),
            })
            .collect();
        let config = Config::for_paths(keys, dir.path().join("out"), dir.path().join("data"));
        Self::with_config(dir, config).await
    }

    pub async fn with_config(dir: tempfile::TempDir, config: Config) -> Self {
        let model = MockModel::new();
        let state = StateFile::load(config.quota_state_path()).await;
        let gateway = Arc::new(LlmGateway::new(&config, model.clone(), state.clone()));
        let progress = Arc::new(ProgressStore::load(config.progress_path()).await);
        let index = Arc::new(MetadataIndex::load(config.metadata_index_path()).await);
        Self {
            dir,
            config,
            model,
            state,
            gateway,
            progress,
            index,
        }
    }

    /// Rebuild gateway/stores from the same directory, simulating a process
    /// restart. The mock model is fresh (no scripted responses carry over).
    pub async fn restart(self) -> Self {
        let Harness { dir, config, .. } = self;
        Self::with_config(dir, config).await
    }

    pub fn orchestrator(&self, fetcher: Arc<dyn AudioFetcher>) -> TranscriptionOrchestrator {
        TranscriptionOrchestrator::new(
            self.config.clone(),
            self.gateway.clone(),
            fetcher,
            self.progress.clone(),
            self.index.clone(),
            ShutdownSignal::never(),
        )
    }
}

/// A two-speaker transcript covering `0..=end` seconds in four cues.
pub fn two_speaker_vtt(end: f64) -> String {
    let q = end / 4.0;
    format!(
        "WEBVTT\n\n\
         {} --> {}\n<v SPEAKER_1>Welcome to the show everyone.\n\n\
         {} --> {}\n<v SPEAKER_2>Great to be here, thanks.\n\n\
         {} --> {}\n<v SPEAKER_1>Let's dive into the topic.\n\n\
         {} --> {}\n<v SPEAKER_2>The future is full of graphs.\n",
        ts(0.0),
        ts(q),
        ts(q),
        ts(2.0 * q),
        ts(2.0 * q),
        ts(3.0 * q),
        ts(3.0 * q),
        ts(end),
    )
}

pub fn ts(seconds: f64) -> String {
    podweave::vtt::format_timestamp(seconds)
}

pub fn episode(guid: &str, duration: Option<f64>) -> Episode {
    Episode {
        guid: guid.to_string(),
        title: format!("Episode {guid}"),
        audio_url: format!("https://example.com/{guid}.mp3"),
        duration_seconds: duration,
        publication_date: Some(
            chrono::DateTime::parse_from_rfc3339("2026-03-14T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        ),
        podcast_name: "Deep Dives".to_string(),
        description: Some("A conversation between Alice and Bob.".to_string()),
    }
}
