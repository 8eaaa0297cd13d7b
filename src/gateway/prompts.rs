//! Prompt builders for the gateway operations.
//!
//! Prompts are plain strings; the model is a black box behind a text
//! contract, so everything the pipeline wants must be spelled out here.

use crate::episode::Episode;
use crate::vtt::cue::{Cue, format_timestamp};

/// How many trailing cues of the existing transcript are replayed to the
/// model as conversational context for a continuation request.
pub const CONTINUATION_CONTEXT_CUES: usize = 5;

fn duration_line(episode: &Episode) -> String {
    match episode.duration_seconds {
        Some(secs) => format!(
            "The episode is {} long.",
            format_timestamp(secs)
        ),
        None => "The episode duration is unknown.".to_string(),
    }
}

/// Full-episode transcription prompt.
pub fn transcription(episode: &Episode) -> String {
    format!(
        "Transcribe this podcast episode as a WebVTT subtitle file.\n\
         Podcast: {podcast}\n\
         Episode: {title}\n\
         {duration}\n\
         Expect around {speakers} distinct speakers.\n\n\
         Rules:\n\
         - Output only valid WebVTT, starting with the literal header WEBVTT.\n\
         - Timestamps in HH:MM:SS.mmm format covering the full episode.\n\
         - Attribute every cue with a voice tag: <v SPEAKER_1>, <v SPEAKER_2>, ...\n\
         - Use the same SPEAKER_N label for the same voice throughout.\n\
         - Do not summarize or skip content.",
        podcast = episode.podcast_name,
        title = episode.title,
        duration = duration_line(episode),
        speakers = episode.expected_speakers(),
    )
}

/// Continuation prompt: resume transcription at `from_seconds`, replaying the
/// last few cues so the model keeps speaker labels consistent.
pub fn continuation(episode: &Episode, from_seconds: f64, existing: &[Cue]) -> String {
    let tail: Vec<String> = existing
        .iter()
        .rev()
        .take(CONTINUATION_CONTEXT_CUES)
        .rev()
        .map(|cue| {
            format!(
                "{} --> {}\n{}",
                format_timestamp(cue.start),
                format_timestamp(cue.end),
                cue.payload()
            )
        })
        .collect();
    format!(
        "Continue transcribing this podcast episode as WebVTT.\n\
         Podcast: {podcast}\n\
         Episode: {title}\n\
         {duration}\n\n\
         The transcript so far ends with these cues:\n\n{tail}\n\n\
         Rules:\n\
         - Resume at or slightly before {from}, and continue to the end of the audio.\n\
         - Output only WebVTT cues (the WEBVTT header is optional).\n\
         - Keep the existing SPEAKER_N labels for the same voices.",
        podcast = episode.podcast_name,
        title = episode.title,
        duration = duration_line(episode),
        tail = tail.join("\n\n"),
        from = format_timestamp(from_seconds),
    )
}

/// Speaker-identification prompt. JSON mode; the response schema mirrors the
/// shape `parse_speaker_response` expects.
pub fn speaker_identification(
    episode: &Episode,
    labels: &[String],
    sample_dialogue: &str,
) -> String {
    format!(
        "Identify the speakers in this podcast transcript.\n\
         Podcast: {podcast}\n\
         Episode: {title}\n\
         Description: {description}\n\
         Generic labels present: {labels}\n\n\
         Sample dialogue:\n{sample}\n\n\
         Respond with JSON only:\n\
         {{\n\
           \"speaker_mappings\": {{\"SPEAKER_1\": \"<name or role>\", ...}},\n\
           \"confidence_scores\": {{\"SPEAKER_1\": <0.0-1.0>, ...}}\n\
         }}\n\
         Use a person's name when the dialogue or metadata reveals it; fall\n\
         back to a role such as \"Host\" or \"Guest\" otherwise.",
        podcast = episode.podcast_name,
        title = episode.title,
        description = episode.description.as_deref().unwrap_or("(none)"),
        labels = labels.join(", "),
        sample = sample_dialogue,
    )
}
