//! Stage A: feed → audio → speaker-attributed WebVTT on disk.

pub mod audio;
pub mod index;
pub mod orchestrator;
pub mod speakers;

pub use audio::{AudioError, AudioFetcher, HttpAudioFetcher};
pub use index::{EpisodeRecord, IndexStatistics, MetadataIndex};
pub use orchestrator::{
    ContinuationInfo, EpisodeOutcome, OrchestratorError, OutcomeStatus, RunSummary,
    TranscriptionOrchestrator, time_until_quota_reset,
};
pub use speakers::{SpeakerResolution, role_labels};
