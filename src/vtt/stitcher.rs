//! Merging overlapping transcript segments without duplicating cues.
//!
//! Continuation requests deliberately re-cover the tail of the existing
//! transcript, so the fragment's leading cues usually repeat cues we already
//! hold. A cue from a later segment is suppressed when an accepted cue starts
//! within the overlap window and carries similar text.

use crate::text::similarity::overlap_ratio;

use super::cue::Cue;
use super::parser::{VttDocument, parse};

const TEXT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Whether two cue texts describe the same utterance.
///
/// Voice tags are already stripped by the parser. Empty strings are never
/// similar. Containment either way counts, as does an LCS ratio (normalized
/// by the shorter text) at or above 0.85.
pub fn texts_similar(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }
    overlap_ratio(&a, &b) >= TEXT_SIMILARITY_THRESHOLD
}

/// Merge cue lists in caller order, suppressing duplicates from later
/// segments. The result is sorted by start time, non-decreasing.
pub fn stitch_cues(segments: Vec<Vec<Cue>>, overlap_seconds: f64) -> Vec<Cue> {
    let mut merged: Vec<Cue> = Vec::new();
    for segment in segments {
        for cue in segment {
            let duplicate = merged.iter().any(|kept| {
                (kept.start - cue.start).abs() <= overlap_seconds
                    && texts_similar(&kept.text, &cue.text)
            });
            if !duplicate {
                merged.push(cue);
            }
        }
    }
    merged.sort_by(|a, b| a.start.total_cmp(&b.start));
    merged
}

/// Stitch raw VTT segment texts into one document.
///
/// Metadata comes from the first segment that carries any. If any segment
/// fails to parse, falls back to textual concatenation with subsequent
/// `WEBVTT` headers dropped.
pub fn stitch(segments: &[String], overlap_seconds: f64) -> String {
    let mut parsed = Vec::with_capacity(segments.len());
    for segment in segments {
        match parse(segment) {
            Ok(doc) => parsed.push(doc),
            Err(err) => {
                tracing::warn!(error = %err, "segment failed to parse; falling back to concatenation");
                return concat_fallback(segments);
            }
        }
    }

    let metadata = parsed
        .iter()
        .map(|d| d.metadata.clone())
        .find(|m| !m.is_empty())
        .unwrap_or_default();
    let cues = stitch_cues(parsed.into_iter().map(|d| d.cues).collect(), overlap_seconds);
    super::writer::render(&VttDocument { metadata, cues })
}

fn concat_fallback(segments: &[String]) -> String {
    let mut out = String::from("WEBVTT\n");
    for segment in segments {
        let body = segment
            .trim_start_matches('\u{feff}')
            .trim_start()
            .strip_prefix("WEBVTT")
            .unwrap_or(segment)
            .trim_start_matches(['\r', '\n']);
        out.push('\n');
        out.push_str(body.trim_end());
        out.push('\n');
    }
    out
}
