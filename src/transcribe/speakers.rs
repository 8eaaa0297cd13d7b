//! Speaker resolution on top of the gateway's identification call.
//!
//! Identified names below the confidence threshold are replaced with
//! descriptive role labels rather than shipping unverified guesses. A
//! single-speaker transcript short-circuits without a model call, and a
//! failed identification degrades to role labels, never to a failed episode.

use rustc_hash::FxHashMap;

use crate::episode::Episode;
use crate::gateway::{GatewayError, LlmGateway};
use crate::vtt::VttDocument;

/// Minimum confidence for accepting an identified name.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Final label → display-name mapping for one episode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeakerResolution {
    pub names: FxHashMap<String, String>,
    /// False when the mapping is a role-label fallback.
    pub identified: bool,
}

/// Assign role labels in first-appearance order: Host, Guest, Guest 2, …
pub fn role_labels(labels: &[String]) -> FxHashMap<String, String> {
    let mut names = FxHashMap::default();
    for (i, label) in labels.iter().enumerate() {
        let role = match i {
            0 => "Host".to_string(),
            1 => "Guest".to_string(),
            n => format!("Guest {n}"),
        };
        names.insert(label.clone(), role);
    }
    names
}

/// Resolve speaker names for a transcript.
///
/// Quota exhaustion propagates (the caller decides whether the run can
/// continue); every other failure degrades to role labels.
pub async fn resolve(
    gateway: &LlmGateway,
    doc: &VttDocument,
    episode: &Episode,
) -> Result<SpeakerResolution, GatewayError> {
    let labels = doc.speaker_labels();
    if labels.is_empty() {
        return Ok(SpeakerResolution::default());
    }
    if labels.len() == 1 {
        let mut names = FxHashMap::default();
        names.insert(labels[0].clone(), "Host".to_string());
        return Ok(SpeakerResolution {
            names,
            identified: true,
        });
    }

    match gateway.identify_speakers(doc, episode).await {
        Ok(identification) => {
            let roles = role_labels(&labels);
            let mut names = FxHashMap::default();
            let mut accepted = 0usize;
            for label in &labels {
                let confident = identification
                    .confidence
                    .get(label)
                    .is_some_and(|c| *c >= CONFIDENCE_THRESHOLD);
                let name = match identification.mappings.get(label) {
                    Some(name) if confident && !name.trim().is_empty() => {
                        accepted += 1;
                        name.clone()
                    }
                    _ => roles.get(label).cloned().unwrap_or_else(|| label.clone()),
                };
                names.insert(label.clone(), name);
            }
            tracing::info!(
                accepted,
                total = labels.len(),
                "speaker identification applied"
            );
            Ok(SpeakerResolution {
                names,
                identified: accepted > 0,
            })
        }
        Err(err @ GatewayError::QuotaExhausted) => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, "speaker identification failed; using role labels");
            Ok(SpeakerResolution {
                names: role_labels(&labels),
                identified: false,
            })
        }
    }
}

/// Rewrite cue speaker labels through the resolved mapping. Labels without a
/// mapping are left as-is.
pub fn apply(doc: &mut VttDocument, resolution: &SpeakerResolution) {
    for cue in &mut doc.cues {
        if let Some(label) = &cue.speaker {
            if let Some(name) = resolution.names.get(label) {
                cue.speaker = Some(name.clone());
            }
        }
    }
}
