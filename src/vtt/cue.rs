//! Cue model and WebVTT timestamp handling.

use serde::{Deserialize, Serialize};

/// A single subtitle entry. Invariant: `start < end`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Start time in seconds from episode start.
    pub start: f64,
    /// End time in seconds from episode start.
    pub end: f64,
    /// Speaker label from the `<v …>` voice tag, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub text: String,
}

impl Cue {
    pub fn new(start: f64, end: f64, speaker: Option<&str>, text: &str) -> Self {
        Self {
            start,
            end,
            speaker: speaker.map(str::to_string),
            text: text.to_string(),
        }
    }

    /// Cue body as it appears in a VTT file, voice tag included.
    pub fn payload(&self) -> String {
        match &self.speaker {
            Some(speaker) => format!("<v {speaker}>{}", self.text),
            None => self.text.clone(),
        }
    }
}

/// Parse `HH:MM:SS.mmm` (or the short `MM:SS.mmm` form) into seconds.
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };
    if m >= 60 {
        return None;
    }
    let seconds: f64 = s.parse().ok()?;
    if !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(h as f64 * 3600.0 + m as f64 * 60.0 + seconds)
}

/// Render seconds as `HH:MM:SS.mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}
