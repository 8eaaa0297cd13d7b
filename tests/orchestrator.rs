//! End-to-end transcription scenarios against the deterministic mock
//! provider: happy path, continuation coverage, quota preservation and key
//! rotation, breaker-driven skips, checkpoint resume, and feed boundaries.

mod common;

use common::{Harness, Op, StaticFeed, StubFetcher, episode, ts, two_speaker_vtt};

use podweave::store::EpisodeStatus;
use podweave::store::checkpoint::{CheckpointStore, TRANSCRIBE_STAGES};
use podweave::transcribe::OutcomeStatus;
use podweave::vtt;

#[tokio::test]
async fn happy_path_single_key_single_episode() {
    let harness = Harness::new(1).await;
    let orchestrator = harness.orchestrator(StubFetcher::new());
    let feed = StaticFeed {
        episodes: vec![episode("ep-1", Some(60.0))],
    };

    let summary = orchestrator.run(&feed).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert!(!summary.quota_reached);
    assert_eq!(summary.exit_code(), 0);

    // Deterministic output path, parseable content, identified speakers.
    let output = harness
        .config
        .output_dir
        .join("Deep_Dives")
        .join("2026-03-14_Episode_ep-1.vtt");
    let doc = vtt::parse(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(doc.metadata.get("podcast"), Some("Deep Dives"));
    assert_eq!(doc.metadata.get("guid"), Some("ep-1"));
    assert_eq!(doc.speaker_labels(), vec!["Alice", "Bob"]);
    assert!(doc.coverage_end() >= 0.85 * 60.0);

    // Progress COMPLETED, checkpoint gone, exactly two requests spent.
    let progress = harness.progress.get("ep-1").unwrap();
    assert_eq!(progress.status, EpisodeStatus::Completed);
    assert_eq!(progress.output_path.as_deref(), Some(output.as_path()));
    let checkpoints = CheckpointStore::new(harness.config.checkpoints_dir());
    assert!(checkpoints.active().await.is_none());
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 2);

    // The metadata index picked the episode up.
    assert_eq!(harness.index.search_by_speaker("alice").len(), 1);
}

#[tokio::test]
async fn coverage_shortfall_triggers_continuation_and_stitch() {
    let harness = Harness::new(1).await;

    // First transcription covers only 48 of 120 seconds.
    let short = format!(
        "WEBVTT\n\n\
         {} --> {}\n<v SPEAKER_1>Welcome back to the show.\n\n\
         {} --> {}\n<v SPEAKER_2>Happy to join again.\n\n\
         {} --> {}\n<v SPEAKER_1>Quick recap of last week.\n\n\
         {} --> {}\n<v SPEAKER_2>The main topic today is graphs.\n",
        ts(0.0),
        ts(10.0),
        ts(10.0),
        ts(24.0),
        ts(24.0),
        ts(38.0),
        ts(38.0),
        ts(48.0),
    );
    harness.model.respond(Op::Transcribe, &short);
    // The continuation re-covers the tail (dedup target) then continues to
    // the end of the episode.
    let fragment = format!(
        "WEBVTT\n\n\
         {} --> {}\n<v SPEAKER_2>The main topic today is graphs.\n\n\
         {} --> {}\n<v SPEAKER_1>Graphs connect everything we discussed.\n\n\
         {} --> {}\n<v SPEAKER_2>And that is a wrap for today.\n",
        ts(38.0),
        ts(48.0),
        ts(48.0),
        ts(90.0),
        ts(90.0),
        ts(118.0),
    );
    harness.model.respond(Op::Continuation, &fragment);

    let orchestrator = harness.orchestrator(StubFetcher::new());
    let feed = StaticFeed {
        episodes: vec![episode("ep-2", Some(120.0))],
    };
    let summary = orchestrator.run(&feed).await.unwrap();
    assert_eq!(summary.processed, 1);

    let outcome = &summary.episodes[0];
    let info = outcome.continuation.unwrap();
    assert_eq!(info.attempts, 1);
    assert!(info.final_ratio >= 0.85);

    let doc = vtt::parse(&std::fs::read_to_string(outcome.output_path.as_ref().unwrap()).unwrap())
        .unwrap();
    // Overlap deduplicated: 4 original cues + 2 new ones.
    assert_eq!(doc.cues.len(), 6);
    assert!(doc.cues.windows(2).all(|w| w[0].start <= w[1].start));
    assert!(doc.coverage_end() >= 0.85 * 120.0);

    // transcribe + continuation + speakers.
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 3);
}

#[tokio::test]
async fn quota_preservation_rotates_past_nearly_spent_key() {
    let harness = Harness::new(2).await;
    // Key 0 has spent 24 of 25 requests today.
    harness.state.with(|s| {
        let now = chrono::Utc::now();
        let mut usage =
            podweave::quota::KeyUsage::fresh(now, chrono::Local::now().date_naive());
        usage.requests_today = 24;
        s.usage.insert(0, usage);
    });

    let orchestrator = harness.orchestrator(StubFetcher::new());
    let feed = StaticFeed {
        episodes: vec![episode("ep-3", Some(60.0))],
    };
    let summary = orchestrator.run(&feed).await.unwrap();
    assert_eq!(summary.processed, 1);

    // Key 0 untouched, key 1 funded the whole episode.
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 24);
    assert_eq!(harness.gateway.quota().snapshot(1).requests_today, 2);
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_after_three_failed_episodes_and_skips_the_rest() {
    let harness = Harness::new(1).await;
    // Three episodes each exhaust the retry budget on transient errors,
    // recording one breaker failure apiece.
    for _ in 0..9 {
        harness.model.fail(Op::Transcribe, "503 temporarily unavailable");
    }

    let orchestrator = harness.orchestrator(StubFetcher::new());
    let feed = StaticFeed {
        episodes: vec![
            episode("ep-a", Some(60.0)),
            episode("ep-b", Some(60.0)),
            episode("ep-c", Some(60.0)),
            episode("ep-d", Some(60.0)),
        ],
    };
    let summary = orchestrator.run(&feed).await.unwrap();
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.exit_code(), 2);
    let skipped = summary
        .episodes
        .iter()
        .find(|e| e.status == OutcomeStatus::Skipped)
        .unwrap();
    assert_eq!(skipped.reason.as_deref(), Some("circuit_open"));

    // Cooldown is the initial 30 minutes on the first open.
    let wait = harness
        .gateway
        .breakers()
        .time_until_recovery(0, chrono::Utc::now())
        .unwrap();
    assert!(wait <= std::time::Duration::from_secs(30 * 60));
    assert!(wait >= std::time::Duration::from_secs(29 * 60));
}

#[tokio::test]
async fn checkpoint_resume_skips_paid_stages() {
    let mut harness = Harness::new(1).await;
    harness.config.resume = true;
    let ep = episode("ep-5", Some(60.0));

    // Simulate a run killed after speaker identification: all stages but
    // vtt_generation are checkpointed with artifacts.
    let checkpoints = CheckpointStore::new(harness.config.checkpoints_dir());
    let mut cp = checkpoints
        .begin(&ep.guid, TRANSCRIBE_STAGES, serde_json::to_value(&ep).unwrap())
        .await
        .unwrap();
    checkpoints
        .advance(&mut cp, "download", Some(("mp3", b"fake-audio-bytes")))
        .await
        .unwrap();
    let transcript = two_speaker_vtt(60.0);
    checkpoints
        .advance(&mut cp, "transcription", Some(("vtt", transcript.as_bytes())))
        .await
        .unwrap();
    checkpoints
        .advance(&mut cp, "continuation", Some(("vtt", transcript.as_bytes())))
        .await
        .unwrap();
    let names = br#"{"SPEAKER_1": "Alice", "SPEAKER_2": "Bob"}"#;
    checkpoints
        .advance(&mut cp, "speaker_identification", Some(("json", names)))
        .await
        .unwrap();

    // Rebuild the gateway over the same directory and run with RESUME on.
    let config = harness.config.clone();
    let dir = harness.dir;
    let harness = Harness::with_config(dir, config).await;
    let orchestrator = harness.orchestrator(StubFetcher::new());
    let summary = orchestrator
        .run(&StaticFeed {
            episodes: vec![ep.clone()],
        })
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    // No model call was made: transcription and speakers came from artifacts.
    assert!(harness.model.calls.lock().unwrap().is_empty());
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 0);

    let progress = harness.progress.get("ep-5").unwrap();
    assert_eq!(progress.status, EpisodeStatus::Completed);
    let doc = vtt::parse(
        &std::fs::read_to_string(progress.output_path.as_ref().unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(doc.speaker_labels(), vec!["Alice", "Bob"]);
    assert!(checkpoints.active().await.is_none());
}

#[tokio::test]
async fn empty_feed_reports_clean_zero() {
    let harness = Harness::new(1).await;
    let orchestrator = harness.orchestrator(StubFetcher::new());
    let summary = orchestrator
        .run(&StaticFeed { episodes: vec![] })
        .await
        .unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn all_keys_spent_at_start_skips_everything() {
    let harness = Harness::new(1).await;
    harness.state.with(|s| {
        let now = chrono::Utc::now();
        let mut usage =
            podweave::quota::KeyUsage::fresh(now, chrono::Local::now().date_naive());
        usage.requests_today = 25;
        s.usage.insert(0, usage);
    });

    let orchestrator = harness.orchestrator(StubFetcher::new());
    let feed = StaticFeed {
        episodes: vec![episode("ep-x", Some(60.0)), episode("ep-y", Some(60.0))],
    };
    let summary = orchestrator.run(&feed).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert!(summary.quota_reached);
    assert_eq!(summary.exit_code(), 2);
    // Both episodes stayed pending for the next run.
    assert_eq!(
        harness.progress.get("ep-x").unwrap().status,
        EpisodeStatus::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn download_retries_then_fails_episode() {
    let harness = Harness::new(1).await;
    let orchestrator = harness.orchestrator(StubFetcher::failing_first(10));
    let summary = orchestrator
        .run(&StaticFeed {
            episodes: vec![episode("ep-dl", Some(60.0))],
        })
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    let progress = harness.progress.get("ep-dl").unwrap();
    assert_eq!(progress.status, EpisodeStatus::Failed);
    assert_eq!(progress.error_category.as_deref(), Some("download"));
}

#[tokio::test(start_paused = true)]
async fn download_recovers_within_retry_budget() {
    let harness = Harness::new(1).await;
    let fetcher = StubFetcher::failing_first(2);
    let orchestrator = harness.orchestrator(fetcher.clone());
    let summary = orchestrator
        .run(&StaticFeed {
            episodes: vec![episode("ep-dl2", Some(60.0))],
        })
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(fetcher.fetches.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn shutdown_before_the_run_processes_nothing() {
    let harness = Harness::new(1).await;
    let (handle, signal) = podweave::shutdown::channel();
    let orchestrator = podweave::transcribe::TranscriptionOrchestrator::new(
        harness.config.clone(),
        harness.gateway.clone(),
        StubFetcher::new(),
        harness.progress.clone(),
        harness.index.clone(),
        signal,
    );
    handle.trigger();

    let summary = orchestrator
        .run(&StaticFeed {
            episodes: vec![episode("ep-int", Some(60.0))],
        })
        .await
        .unwrap();
    assert_eq!(summary.processed, 0);
    assert!(summary.interrupted);
    assert_eq!(summary.exit_code(), 130);
    // Nothing was spent and the episode is still pending.
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 0);
    assert_eq!(
        harness.progress.get("ep-int").unwrap().status,
        EpisodeStatus::Pending
    );
}

#[tokio::test]
async fn completed_episodes_are_not_reprocessed() {
    let harness = Harness::new(1).await;
    let orchestrator = harness.orchestrator(StubFetcher::new());
    let feed = StaticFeed {
        episodes: vec![episode("ep-once", Some(60.0))],
    };
    orchestrator.run(&feed).await.unwrap();
    let again = orchestrator.run(&feed).await.unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(again.skipped, 0);
    // Still only the original two requests on the key.
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 2);
}
