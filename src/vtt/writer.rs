//! WebVTT emission with the leading `NOTE` metadata block.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::store::paths::write_bytes_atomic;

use super::cue::format_timestamp;
use super::parser::VttDocument;

/// Keys the generator writes into the `NOTE` block, in emission order.
const NOTE_KEYS: &[&str] = &["podcast", "episode", "guid", "date", "speakers", "generated"];

/// Render a document as WebVTT text.
///
/// Metadata keys the generator knows about are emitted first in a stable
/// order; unknown keys follow alphabetically so re-rendering a parsed file
/// is deterministic.
pub fn render(doc: &VttDocument) -> String {
    let mut out = String::from("WEBVTT\n\n");

    if !doc.metadata.is_empty() {
        out.push_str("NOTE\n");
        let mut written = Vec::new();
        for key in NOTE_KEYS {
            if let Some(value) = doc.metadata.get(key) {
                out.push_str(&format!("{key}: {value}\n"));
                written.push(*key);
            }
        }
        let mut extra: Vec<(String, String)> = Vec::new();
        for key in doc.metadata.keys() {
            if !written.contains(&key.as_str()) {
                if let Some(value) = doc.metadata.get(&key) {
                    extra.push((key.clone(), value.to_string()));
                }
            }
        }
        extra.sort();
        for (key, value) in extra {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out.push('\n');
    }

    for cue in &doc.cues {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.payload()
        ));
    }
    out
}

/// Build the standard `NOTE` metadata for a generated transcript.
pub fn generation_metadata(
    podcast: &str,
    episode: &str,
    date: Option<DateTime<Utc>>,
    speakers: &[String],
) -> super::parser::NoteMetadata {
    let mut metadata = super::parser::NoteMetadata::default();
    metadata.insert("podcast", podcast);
    metadata.insert("episode", episode);
    if let Some(date) = date {
        metadata.insert("date", date.format("%Y-%m-%d").to_string());
    }
    if !speakers.is_empty() {
        metadata.insert("speakers", speakers.join(", "));
    }
    metadata.insert("generated", Utc::now().to_rfc3339());
    metadata
}

/// Atomically write a rendered document to `path`.
pub async fn write_to(path: &Path, doc: &VttDocument) -> std::io::Result<()> {
    write_bytes_atomic(path, render(doc).as_bytes()).await
}
