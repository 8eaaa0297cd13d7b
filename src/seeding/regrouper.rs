//! Turning raw utterances plus analyzer spans into meaningful units.
//!
//! The analyzer's boundaries are suggestions; this pass makes them lawful:
//! every segment lands in exactly one unit, units follow segment order,
//! empty units vanish, and unit times come from the contained segments.

use crate::seeding::structure::{ConversationStructure, MeaningfulUnit, UnitSpan, UnitType};
use crate::vtt::Cue;

/// Build units from `cues` and the analyzed structure.
pub fn regroup(cues: &[Cue], structure: &ConversationStructure) -> Vec<MeaningfulUnit> {
    if cues.is_empty() {
        return Vec::new();
    }
    let spans = lawful_spans(&structure.spans, cues.len());

    let mut units = Vec::with_capacity(spans.len());
    for (index, span) in spans.iter().enumerate() {
        let indices: Vec<usize> = (span.start_index..=span.end_index).collect();
        let first = &cues[span.start_index];
        let last = &cues[span.end_index];
        let text = indices
            .iter()
            .map(|&i| {
                let cue = &cues[i];
                match &cue.speaker {
                    Some(speaker) => format!("{speaker}: {}", cue.text),
                    None => cue.text.clone(),
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        units.push(MeaningfulUnit {
            unit_id: format!("unit_{index:03}"),
            unit_type: span.unit_type,
            summary: span.summary.clone(),
            start_time: first.start,
            end_time: last.end,
            segment_indices: indices,
            themes: span.themes.clone(),
            is_complete: span.is_complete,
            text,
        });
    }
    units
}

/// Clamp, order and gap-fill spans so they partition `0..segment_count`.
///
/// Gaps attach to the preceding span (or the following one at the start);
/// overlapping spans yield to whatever already claimed the segments; spans
/// emptied by clamping are dropped.
fn lawful_spans(raw: &[UnitSpan], segment_count: usize) -> Vec<UnitSpan> {
    let last = segment_count - 1;
    let mut spans: Vec<UnitSpan> = raw
        .iter()
        .filter(|s| s.start_index <= last && s.start_index <= s.end_index)
        .cloned()
        .map(|mut s| {
            s.end_index = s.end_index.min(last);
            s
        })
        .collect();
    spans.sort_by_key(|s| (s.start_index, s.end_index));

    let mut lawful: Vec<UnitSpan> = Vec::with_capacity(spans.len());
    let mut cursor = 0usize;
    for mut span in spans {
        // Yield overlap to the earlier span.
        if span.start_index < cursor {
            if span.end_index < cursor {
                continue;
            }
            span.start_index = cursor;
        }
        // A gap before this span belongs to the previous unit.
        if span.start_index > cursor {
            match lawful.last_mut() {
                Some(prev) => prev.end_index = span.start_index - 1,
                None => span.start_index = 0,
            }
        }
        cursor = span.end_index + 1;
        lawful.push(span);
    }

    if lawful.is_empty() {
        return vec![UnitSpan {
            start_index: 0,
            end_index: last,
            unit_type: UnitType::Discussion,
            summary: String::new(),
            themes: Vec::new(),
            is_complete: true,
        }];
    }
    // Trailing gap joins the final unit.
    if cursor <= last {
        lawful.last_mut().expect("non-empty").end_index = last;
    }
    lawful
}
