//! Control-plane invariants exercised through the gateway: quota bounds,
//! breaker behavior, rotation on quota exhaustion, persistence across
//! restarts.

mod common;

use common::{Harness, Op};

use podweave::config::QuotaLimits;
use podweave::gateway::GatewayError;
use podweave::quota::{QuotaReject, StateFile};

#[tokio::test]
async fn minute_window_bounds_reservations() {
    let harness = Harness::new(1).await;
    let tracker = harness.gateway.quota();

    let mut leased = Vec::new();
    for _ in 0..QuotaLimits::default().requests_per_minute {
        leased.push(tracker.try_reserve(0, 100).unwrap());
    }
    // Slot six in the same minute is refused.
    assert!(matches!(
        tracker.try_reserve(0, 100),
        Err(QuotaReject::MinuteExceeded { .. })
    ));
    for reservation in leased {
        tracker.cancel(reservation);
    }
}

#[tokio::test]
async fn committed_tokens_survive_restart() {
    let harness = Harness::new(1).await;
    harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await
        .unwrap();
    let before = harness.gateway.quota().snapshot(0);
    assert_eq!(before.requests_today, 1);
    // The mock reports 1000 actual tokens; the estimate must not be charged.
    assert_eq!(before.tokens_today, 1_000);

    let harness = harness.restart().await;
    let after = harness.gateway.quota().snapshot(0);
    assert_eq!(after.requests_today, before.requests_today);
    assert_eq!(after.tokens_today, before.tokens_today);
}

#[tokio::test]
async fn quota_error_rotates_to_next_key_once() {
    let harness = Harness::new(2).await;
    harness.model.fail(Op::Extraction, "quota exceeded for key");

    let result = harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await;
    assert!(result.is_ok());

    // Key 0's day is spent; key 1 carried the request.
    assert_eq!(
        harness.gateway.quota().snapshot(0).requests_today,
        QuotaLimits::default().requests_per_day
    );
    assert_eq!(harness.gateway.quota().snapshot(1).requests_today, 1);
    assert_eq!(harness.model.calls_of(Op::Extraction), 2);
}

#[tokio::test]
async fn quota_error_on_last_key_surfaces_exhaustion() {
    let harness = Harness::new(1).await;
    harness.model.fail(Op::Extraction, "quota exceeded for key");

    let result = harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await;
    assert!(matches!(result, Err(GatewayError::QuotaExhausted)));
    assert!(result.unwrap_err().is_quota_stop());
}

#[tokio::test(start_paused = true)]
async fn three_terminal_failures_open_the_breaker() {
    let harness = Harness::new(1).await;
    // Each permanent failure records one breaker failure.
    for _ in 0..3 {
        harness.model.fail(Op::Extraction, "invalid argument");
        let result = harness
            .gateway
            .extract("Extract structured knowledge please".into(), true)
            .await;
        assert!(matches!(result, Err(GatewayError::CallFailed { .. })));
    }
    assert!(!harness.gateway.any_key_attemptable());

    // With the only breaker open, the gateway reports circuit-open.
    let result = harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await;
    assert!(matches!(result, Err(GatewayError::CircuitOpen)));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_then_succeed_without_breaker_damage() {
    let harness = Harness::new(1).await;
    harness.model.fail(Op::Extraction, "503 temporarily unavailable");
    harness.model.fail(Op::Extraction, "connection reset");

    let result = harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await;
    assert!(result.is_ok());
    // Three attempts, one request slot: reserve → retry loop → single commit.
    assert_eq!(harness.model.calls_of(Op::Extraction), 3);
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 1);
    assert!(harness.gateway.any_key_attemptable());
}

#[tokio::test]
async fn breaker_state_persists_across_restart() {
    let harness = Harness::new(1).await;
    for _ in 0..3 {
        harness.gateway.breakers().record_failure(0);
    }
    assert!(!harness.gateway.any_key_attemptable());
    harness.state.persist().await.unwrap();

    let harness = harness.restart().await;
    assert!(!harness.gateway.any_key_attemptable());
    harness.gateway.breakers().force_reset_all();
    assert!(harness.gateway.any_key_attemptable());
}

#[tokio::test]
async fn corrupt_quota_state_starts_from_zero() {
    let harness = Harness::new(1).await;
    std::fs::create_dir_all(harness.config.data_dir.clone()).unwrap();
    std::fs::write(harness.config.quota_state_path(), "{broken").unwrap();

    let state = StateFile::load(harness.config.quota_state_path()).await;
    state.with(|s| {
        assert!(s.usage.is_empty());
        assert!(s.breakers.is_empty());
        assert_eq!(s.next_key_index, 0);
    });
}

#[tokio::test]
async fn rotation_cursor_persists_across_restarts() {
    let harness = Harness::new(3).await;
    harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await
        .unwrap();
    assert_eq!(harness.gateway.quota().snapshot(0).requests_today, 1);

    // Key 0's day runs out; the cursor moves to key 1 and is persisted, so a
    // restart resumes on key 1 instead of walking the list from zero.
    harness.gateway.quota().exhaust_day(0).await;
    harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await
        .unwrap();
    assert_eq!(harness.gateway.quota().snapshot(1).requests_today, 1);

    let harness = harness.restart().await;
    harness
        .gateway
        .extract("Extract structured knowledge please".into(), true)
        .await
        .unwrap();
    assert_eq!(harness.gateway.quota().snapshot(1).requests_today, 2);
}

#[tokio::test]
async fn audio_handles_released_on_success_and_failure() {
    let harness = Harness::new(1).await;
    let audio = harness.dir.path().join("audio.mp3");
    tokio::fs::write(&audio, b"bytes").await.unwrap();
    let episode = common::episode("ep-1", Some(60.0));

    harness.gateway.transcribe(&audio, &episode).await.unwrap();
    assert_eq!(
        harness.model.uploads.load(std::sync::atomic::Ordering::SeqCst),
        harness.model.deletes.load(std::sync::atomic::Ordering::SeqCst)
    );

    harness.model.fail(Op::Transcribe, "invalid argument");
    let _ = harness.gateway.transcribe(&audio, &episode).await;
    assert_eq!(
        harness.model.uploads.load(std::sync::atomic::Ordering::SeqCst),
        harness.model.deletes.load(std::sync::atomic::Ordering::SeqCst)
    );
}
