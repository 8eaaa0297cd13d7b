//! File-backed state stores: progress, checkpoints and the atomic-write
//! helpers they share.

pub mod checkpoint;
pub mod paths;
pub mod progress;

pub use checkpoint::{
    CheckpointError, CheckpointStore, EpisodeCheckpoint, SEEDING_STAGES, TRANSCRIBE_STAGES,
};
pub use progress::{EpisodeProgress, EpisodeStatus, ProgressError, ProgressStore};
