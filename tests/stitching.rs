//! Stitching invariants over whole VTT documents.

use podweave::vtt::{self, Cue, stitch, stitch_cues, texts_similar};

fn cue(start: f64, end: f64, text: &str) -> Cue {
    Cue::new(start, end, Some("SPEAKER_1"), text)
}

#[test]
fn stitched_documents_keep_metadata_and_order() {
    let base = "WEBVTT\n\nNOTE\npodcast: Deep Dives\nepisode: Pilot\n\n00:00:00.000 --> 00:00:10.000\n<v SPEAKER_1>First thoughts on the topic.\n\n00:00:10.000 --> 00:00:20.000\n<v SPEAKER_2>Second thoughts follow.\n".to_string();
    let fragment = "WEBVTT\n\n00:00:19.000 --> 00:00:20.000\n<v SPEAKER_2>second thoughts follow\n\n00:00:20.000 --> 00:00:30.000\n<v SPEAKER_1>Entirely new ground now.\n".to_string();

    let merged = stitch(&[base, fragment], 3.0);
    let doc = vtt::parse(&merged).unwrap();
    assert_eq!(doc.metadata.get("podcast"), Some("Deep Dives"));
    assert_eq!(doc.cues.len(), 3);
    assert!(doc.cues.windows(2).all(|w| w[0].start <= w[1].start));
    assert_eq!(doc.coverage_end(), 30.0);
}

#[test]
fn no_overlapping_similar_pair_survives() {
    let segments = vec![
        vec![
            cue(0.0, 5.0, "The quick brown fox"),
            cue(5.0, 9.0, "jumps over the lazy dog"),
        ],
        vec![
            cue(5.5, 9.0, "Jumps over the lazy dog"),
            cue(9.0, 14.0, "and keeps on running"),
        ],
        vec![cue(9.5, 14.0, "and keeps on running!")],
    ];
    let merged = stitch_cues(segments, 3.0);
    for (i, a) in merged.iter().enumerate() {
        for b in merged.iter().skip(i + 1) {
            assert!(
                !((a.start - b.start).abs() <= 3.0 && texts_similar(&a.text, &b.text)),
                "duplicate pair survived: {:?} / {:?}",
                a.text,
                b.text
            );
        }
    }
    assert_eq!(merged.len(), 3);
}

#[test]
fn three_way_stitch_extends_coverage_monotonically() {
    // Each fragment re-emits the previous tail cue near its original start,
    // then continues.
    let a = vec![cue(0.0, 15.0, "the intro banter"), cue(15.0, 30.0, "part one of the talk")];
    let b = vec![
        cue(15.5, 30.0, "part one of the talk"),
        cue(30.0, 60.0, "part two of the talk"),
    ];
    let c = vec![
        cue(30.5, 60.0, "Part two of the talk."),
        cue(60.0, 90.0, "part three of the talk"),
    ];
    let merged = stitch_cues(vec![a, b, c], 3.0);
    assert_eq!(merged.len(), 4);
    assert_eq!(merged.last().unwrap().end, 90.0);
    assert!(merged.windows(2).all(|w| w[0].start <= w[1].start));
}

#[test]
fn unparseable_segment_falls_back_to_concatenation() {
    let merged = stitch(
        &[
            "WEBVTT\n\n00:00:00.000 --> 00:00:05.000\nfine cue\n".to_string(),
            "WEBVTT\nbroken --> timestamps here\ntext\n".to_string(),
        ],
        3.0,
    );
    assert_eq!(merged.matches("WEBVTT").count(), 1);
    assert!(merged.contains("fine cue"));
    assert!(merged.contains("text"));
}
