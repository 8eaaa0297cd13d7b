//! Property tests for the pure kernels: stitch ordering and dedup, quota
//! reservation bounds, name sanitization, similarity ratios.

use proptest::prelude::*;

use podweave::config::QuotaLimits;
use podweave::quota::{QuotaTracker, StateFile};
use podweave::text::{ratio, sanitize_component};
use podweave::vtt::{Cue, stitch_cues, texts_similar};

fn cue_strategy() -> impl Strategy<Value = Cue> {
    (0u32..300, 1u32..30, "[abc ]{0,8}").prop_map(|(start, dur, text)| {
        Cue::new(start as f64, (start + dur) as f64, Some("S1"), &text)
    })
}

fn segments_strategy() -> impl Strategy<Value = Vec<Vec<Cue>>> {
    proptest::collection::vec(proptest::collection::vec(cue_strategy(), 0..12), 1..4)
}

proptest! {
    #[test]
    fn stitched_output_is_sorted(segments in segments_strategy()) {
        let merged = stitch_cues(segments, 3.0);
        prop_assert!(merged.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn stitched_output_has_no_near_duplicates(segments in segments_strategy()) {
        let merged = stitch_cues(segments, 3.0);
        for (i, a) in merged.iter().enumerate() {
            for b in merged.iter().skip(i + 1) {
                prop_assert!(
                    !((a.start - b.start).abs() <= 3.0 && texts_similar(&a.text, &b.text)),
                    "near-duplicate survived: {a:?} vs {b:?}"
                );
            }
        }
    }

    #[test]
    fn stitching_never_invents_cues(segments in segments_strategy()) {
        let total: usize = segments.iter().map(Vec::len).sum();
        let merged = stitch_cues(segments, 3.0);
        prop_assert!(merged.len() <= total);
    }

    #[test]
    fn minute_reservations_never_exceed_the_limit(attempts in 0usize..20) {
        let tracker = QuotaTracker::new(QuotaLimits::default(), StateFile::ephemeral());
        let mut granted = Vec::new();
        for _ in 0..attempts {
            if let Ok(reservation) = tracker.try_reserve(0, 10) {
                granted.push(reservation);
            }
        }
        let limit = QuotaLimits::default().requests_per_minute as usize;
        prop_assert_eq!(granted.len(), attempts.min(limit));
        for reservation in granted {
            tracker.cancel(reservation);
        }
    }

    #[test]
    fn sanitized_components_are_path_safe(name in ".{0,200}") {
        let out = sanitize_component(&name);
        prop_assert!(!out.is_empty());
        prop_assert!(out.chars().count() <= 100);
        prop_assert!(out.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn similarity_ratio_is_symmetric_and_bounded(a in "[a-d]{0,10}", b in "[a-d]{0,10}") {
        let r1 = ratio(&a, &b);
        let r2 = ratio(&b, &a);
        prop_assert!((r1 - r2).abs() < 1e-12);
        prop_assert!((0.0..=1.0).contains(&r1));
    }
}
