//! WebVTT parsing: header, `NOTE` metadata block, cue list.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::cue::{Cue, parse_timestamp};

/// Key/value metadata carried in the leading `NOTE` block of generated files.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoteMetadata {
    entries: FxHashMap<String, String>,
}

impl NoteMetadata {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into().to_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// The `speakers` entry split on commas.
    pub fn speakers(&self) -> Vec<String> {
        self.get("speakers")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A parsed WebVTT file: optional metadata plus ordered cues.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VttDocument {
    pub metadata: NoteMetadata,
    pub cues: Vec<Cue>,
}

impl VttDocument {
    /// End time of the last cue, or 0 for an empty document. This is the
    /// transcript's coverage in seconds.
    pub fn coverage_end(&self) -> f64 {
        self.cues.last().map(|c| c.end).unwrap_or(0.0)
    }

    /// Distinct speaker labels in order of first appearance.
    pub fn speaker_labels(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for cue in &self.cues {
            if let Some(speaker) = &cue.speaker {
                if !seen.contains(speaker) {
                    seen.push(speaker.clone());
                }
            }
        }
        seen
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum VttError {
    #[error("missing WEBVTT header")]
    #[diagnostic(
        code(podweave::vtt::missing_header),
        help("A WebVTT file must begin with the literal `WEBVTT`.")
    )]
    MissingHeader,

    #[error("malformed timing line at line {line}: {content}")]
    #[diagnostic(
        code(podweave::vtt::bad_timing),
        help("Expected `HH:MM:SS.mmm --> HH:MM:SS.mmm`.")
    )]
    BadTiming { line: usize, content: String },

    #[error("cue at line {line} ends before it starts")]
    #[diagnostic(code(podweave::vtt::inverted_cue))]
    InvertedCue { line: usize },
}

/// Split `<v Speaker>utterance` into its parts. Tolerates a closing `</v>`.
fn split_voice_tag(payload: &str) -> (Option<String>, String) {
    let trimmed = payload.trim();
    if let Some(rest) = trimmed.strip_prefix("<v ") {
        if let Some(close) = rest.find('>') {
            let speaker = rest[..close].trim().to_string();
            let mut text = rest[close + 1..].trim().to_string();
            if let Some(stripped) = text.strip_suffix("</v>") {
                text = stripped.trim().to_string();
            }
            return (Some(speaker), text);
        }
    }
    (None, trimmed.to_string())
}

/// Remove voice tags from a payload, keeping only the spoken text.
pub fn strip_voice_tags(payload: &str) -> String {
    split_voice_tag(payload).1
}

/// Parse a WebVTT document.
///
/// Cue identifiers are tolerated and discarded. `NOTE` blocks before the
/// first cue are scanned for `key: value` lines into [`NoteMetadata`]; later
/// `NOTE` blocks are skipped.
pub fn parse(input: &str) -> Result<VttDocument, VttError> {
    let input = input.trim_start_matches('\u{feff}');
    let mut lines = input.lines().enumerate().peekable();

    match lines.next() {
        Some((_, first)) if first.trim_start().starts_with("WEBVTT") => {}
        _ => return Err(VttError::MissingHeader),
    }

    let mut doc = VttDocument::default();
    while let Some((line_no, line)) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed == "NOTE" || trimmed.starts_with("NOTE ") {
            let before_first_cue = doc.cues.is_empty();
            // Inline `NOTE key: value` form.
            if before_first_cue {
                if let Some(rest) = trimmed.strip_prefix("NOTE ") {
                    note_line(&mut doc.metadata, rest);
                }
            }
            while let Some((_, note)) = lines.peek() {
                if note.trim().is_empty() {
                    break;
                }
                if before_first_cue {
                    note_line(&mut doc.metadata, note);
                }
                lines.next();
            }
            continue;
        }

        // Either a cue identifier or a timing line.
        let (timing_no, timing) = if trimmed.contains("-->") {
            (line_no, trimmed.to_string())
        } else {
            match lines.next() {
                Some((n, next)) if next.contains("-->") => (n, next.trim().to_string()),
                _ => {
                    return Err(VttError::BadTiming {
                        line: line_no + 1,
                        content: trimmed.to_string(),
                    });
                }
            }
        };

        let mut halves = timing.splitn(2, "-->");
        let start_raw = halves.next().unwrap_or_default();
        // Cue settings after the end timestamp are discarded.
        let end_raw = halves
            .next()
            .unwrap_or_default()
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        let (start, end) = match (parse_timestamp(start_raw), parse_timestamp(&end_raw)) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(VttError::BadTiming {
                    line: timing_no + 1,
                    content: timing,
                });
            }
        };
        if start >= end {
            return Err(VttError::InvertedCue { line: timing_no + 1 });
        }

        let mut payload_lines = Vec::new();
        while let Some((_, text)) = lines.peek() {
            if text.trim().is_empty() {
                break;
            }
            payload_lines.push(text.trim().to_string());
            lines.next();
        }
        let (speaker, text) = split_voice_tag(&payload_lines.join(" "));
        doc.cues.push(Cue {
            start,
            end,
            speaker,
            text,
        });
    }

    Ok(doc)
}

fn note_line(metadata: &mut NoteMetadata, line: &str) {
    if let Some((key, value)) = line.split_once(':') {
        let key = key.trim();
        let value = value.trim();
        if !key.is_empty() && !value.is_empty() {
            metadata.insert(key, value);
        }
    }
}
