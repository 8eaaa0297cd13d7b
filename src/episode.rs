//! Episode domain types and the feed seam.
//!
//! RSS fetching and XML parsing live outside this crate. Callers supply an
//! [`EpisodeFeed`] implementation; [`JsonManifestFeed`] is the built-in
//! adapter that loads a local JSON manifest of episodes, which is also what
//! the test suite drives.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One item from a podcast feed. Immutable once admitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Stable feed-assigned identifier.
    pub guid: String,
    pub title: String,
    pub audio_url: String,
    /// Declared duration in seconds, when the feed carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<DateTime<Utc>>,
    pub podcast_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Episode {
    /// Expected number of distinct speakers. Interview shows run with two.
    pub fn expected_speakers(&self) -> u32 {
        2
    }
}

/// Errors from feed adapters.
#[derive(Debug, Error, Diagnostic)]
pub enum FeedError {
    #[error("failed to read feed source {path}: {source}")]
    #[diagnostic(
        code(podweave::feed::io),
        help("Check that the manifest path exists and is readable.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("feed source is not valid episode JSON: {source}")]
    #[diagnostic(
        code(podweave::feed::malformed),
        help("The manifest must be a JSON array of episode objects.")
    )]
    Malformed {
        #[source]
        source: serde_json::Error,
    },

    #[error("feed fetch failed: {message}")]
    #[diagnostic(code(podweave::feed::fetch))]
    Fetch { message: String },
}

/// Source of episodes for one run. RSS adapters implement this outside the
/// crate; ordering of the returned vector is the processing order.
#[async_trait]
pub trait EpisodeFeed: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Episode>, FeedError>;
}

/// Feed adapter over a local JSON manifest (an array of [`Episode`] objects).
#[derive(Clone, Debug)]
pub struct JsonManifestFeed {
    path: PathBuf,
}

impl JsonManifestFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EpisodeFeed for JsonManifestFeed {
    async fn fetch(&self) -> Result<Vec<Episode>, FeedError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| FeedError::Io {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_str(&raw).map_err(|source| FeedError::Malformed { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manifest_feed_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        let episodes = vec![Episode {
            guid: "ep-1".into(),
            title: "Pilot".into(),
            audio_url: "https://example.com/1.mp3".into(),
            duration_seconds: Some(60.0),
            publication_date: None,
            podcast_name: "Test Show".into(),
            description: None,
        }];
        std::fs::write(&path, serde_json::to_string(&episodes).unwrap()).unwrap();

        let feed = JsonManifestFeed::new(&path);
        let fetched = feed.fetch().await.unwrap();
        assert_eq!(fetched, episodes);
    }

    #[tokio::test]
    async fn manifest_feed_reports_missing_file() {
        let feed = JsonManifestFeed::new("/nonexistent/feed.json");
        assert!(matches!(feed.fetch().await, Err(FeedError::Io { .. })));
    }
}
