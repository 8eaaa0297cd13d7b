//! Audio acquisition seam.
//!
//! The orchestrator downloads each episode's audio to a local file before
//! handing it to the gateway. [`HttpAudioFetcher`] is the production
//! implementation; tests substitute a fixture-backed fetcher.

use std::path::Path;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AudioError {
    #[error("audio download failed for {url}: {message}")]
    #[diagnostic(code(podweave::audio::download))]
    Download { url: String, message: String },

    #[error("downloaded audio is empty: {url}")]
    #[diagnostic(
        code(podweave::audio::zero_size),
        help("The server returned a zero-byte body; the URL may be stale.")
    )]
    ZeroSize { url: String },

    #[error("failed to write audio to disk: {source}")]
    #[diagnostic(code(podweave::audio::io))]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Fetch one audio artifact to a local path.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), AudioError>;
}

/// reqwest-backed fetcher.
pub struct HttpAudioFetcher {
    client: reqwest::Client,
}

impl HttpAudioFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAudioFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), AudioError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| AudioError::Download {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        let bytes = response.bytes().await.map_err(|err| AudioError::Download {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(AudioError::ZeroSize {
                url: url.to_string(),
            });
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        tracing::debug!(url, bytes = bytes.len(), dest = %dest.display(), "audio downloaded");
        Ok(())
    }
}
