//! Per-key quota accounting: requests per minute, requests per day and
//! tokens per day, with midnight-local rollover and crash-safe persistence.
//!
//! Every outbound model call follows the same sequence: `try_reserve` claims
//! one request slot atomically, the call runs, and the caller either
//! `commit`s the reservation with the actual token cost or `cancel`s it.
//! Reservations dropped without settling are a programming error and are
//! logged loudly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use uuid::Uuid;

use crate::config::QuotaLimits;
use crate::quota::state_file::{KeyUsage, StateFile};

const MINUTE_WINDOW_SECONDS: i64 = 60;

fn minute_window() -> chrono::Duration {
    chrono::Duration::seconds(MINUTE_WINDOW_SECONDS)
}

/// Why a reservation was refused.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QuotaReject {
    /// The trailing 60-second window is full; `retry_in` is the time until
    /// the window resets.
    MinuteExceeded { retry_in: Duration },
    DayRequestsExceeded,
    DayTokensExceeded,
}

impl std::fmt::Display for QuotaReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaReject::MinuteExceeded { retry_in } => {
                write!(f, "minute_exceeded (retry in {:.0?})", retry_in)
            }
            QuotaReject::DayRequestsExceeded => write!(f, "day_requests_exceeded"),
            QuotaReject::DayTokensExceeded => write!(f, "day_tokens_exceeded"),
        }
    }
}

/// A held claim on one request of a key's quota, pending commit or cancel.
#[derive(Debug)]
pub struct Reservation {
    pub key_id: usize,
    pub id: Uuid,
    pub estimated_tokens: u64,
    settled: bool,
}

impl Reservation {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(
                key_id = self.key_id,
                reservation = %self.id,
                "reservation dropped without commit or cancel"
            );
        }
    }
}

/// Point-in-time view of one key's counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub requests_today: u32,
    pub tokens_today: u64,
    pub requests_last_minute: u32,
    pub minute_slots_remaining: u32,
}

/// Per-key quota counters over the shared control-plane document.
pub struct QuotaTracker {
    limits: QuotaLimits,
    file: Arc<StateFile>,
}

impl QuotaTracker {
    pub fn new(limits: QuotaLimits, file: Arc<StateFile>) -> Self {
        Self { limits, file }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Atomically check all three limits and claim one request slot.
    pub fn try_reserve(
        &self,
        key_id: usize,
        estimated_tokens: u64,
    ) -> Result<Reservation, QuotaReject> {
        self.try_reserve_at(key_id, estimated_tokens, Utc::now(), local_today())
    }

    /// Deterministic variant of [`try_reserve`](Self::try_reserve); `today_local`
    /// is the calendar date used for the day-rollover check.
    pub fn try_reserve_at(
        &self,
        key_id: usize,
        estimated_tokens: u64,
        now: DateTime<Utc>,
        today_local: NaiveDate,
    ) -> Result<Reservation, QuotaReject> {
        let limits = self.limits;
        self.file.with(|state| {
            let usage = state
                .usage
                .entry(key_id)
                .or_insert_with(|| KeyUsage::fresh(now, today_local));
            roll_windows(usage, now, today_local);

            if usage.requests_today >= limits.requests_per_day {
                return Err(QuotaReject::DayRequestsExceeded);
            }
            if usage.tokens_today.saturating_add(estimated_tokens) > limits.tokens_per_day {
                return Err(QuotaReject::DayTokensExceeded);
            }
            if usage.requests_in_current_minute >= limits.requests_per_minute {
                let window_end = usage.minute_window_start + minute_window();
                let retry_in = (window_end - now).to_std().unwrap_or_default();
                return Err(QuotaReject::MinuteExceeded { retry_in });
            }

            usage.requests_in_current_minute += 1;
            usage.requests_today += 1;
            Ok(Reservation {
                key_id,
                id: Uuid::new_v4(),
                estimated_tokens,
                settled: false,
            })
        })
    }

    /// Commit a reservation with the token cost actually incurred, then
    /// persist the counters.
    pub async fn commit(&self, reservation: Reservation, actual_tokens: u64) {
        let key_id = reservation.key_id;
        reservation.settle();
        self.file.with(|state| {
            if let Some(usage) = state.usage.get_mut(&key_id) {
                usage.tokens_today = usage.tokens_today.saturating_add(actual_tokens);
            }
        });
        if let Err(err) = self.file.persist().await {
            tracing::warn!(key_id, error = %err, "failed to persist quota state after commit");
        }
    }

    /// Roll back a reservation, releasing the request slot it claimed.
    pub fn cancel(&self, reservation: Reservation) {
        let key_id = reservation.key_id;
        reservation.settle();
        self.file.with(|state| {
            if let Some(usage) = state.usage.get_mut(&key_id) {
                usage.requests_in_current_minute = usage.requests_in_current_minute.saturating_sub(1);
                usage.requests_today = usage.requests_today.saturating_sub(1);
            }
        });
    }

    /// Mark a key's daily request budget as fully spent (the provider told us
    /// so), then persist.
    pub async fn exhaust_day(&self, key_id: usize) {
        let limits = self.limits;
        let now = Utc::now();
        let today = local_today();
        self.file.with(|state| {
            let usage = state
                .usage
                .entry(key_id)
                .or_insert_with(|| KeyUsage::fresh(now, today));
            roll_windows(usage, now, today);
            usage.requests_today = limits.requests_per_day;
        });
        if let Err(err) = self.file.persist().await {
            tracing::warn!(key_id, error = %err, "failed to persist quota state after exhaustion");
        }
    }

    pub fn snapshot(&self, key_id: usize) -> QuotaSnapshot {
        self.snapshot_at(key_id, Utc::now(), local_today())
    }

    pub fn snapshot_at(
        &self,
        key_id: usize,
        now: DateTime<Utc>,
        today_local: NaiveDate,
    ) -> QuotaSnapshot {
        let limits = self.limits;
        self.file.with(|state| {
            let usage = state
                .usage
                .entry(key_id)
                .or_insert_with(|| KeyUsage::fresh(now, today_local));
            roll_windows(usage, now, today_local);
            QuotaSnapshot {
                requests_today: usage.requests_today,
                tokens_today: usage.tokens_today,
                requests_last_minute: usage.requests_in_current_minute,
                minute_slots_remaining: limits
                    .requests_per_minute
                    .saturating_sub(usage.requests_in_current_minute),
            }
        })
    }

    /// Remaining full requests in today's budget for a key.
    pub fn requests_remaining_today(&self, key_id: usize) -> u32 {
        let snap = self.snapshot(key_id);
        self.limits.requests_per_day.saturating_sub(snap.requests_today)
    }
}

/// Reset counters whose windows have elapsed. Called on every access.
fn roll_windows(usage: &mut KeyUsage, now: DateTime<Utc>, today_local: NaiveDate) {
    if usage.day_start_local != today_local {
        *usage = KeyUsage::fresh(now, today_local);
        return;
    }
    if now - usage.minute_window_start >= minute_window() {
        usage.minute_window_start = now;
        usage.requests_in_current_minute = 0;
    }
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tracker() -> QuotaTracker {
        QuotaTracker::new(QuotaLimits::default(), StateFile::ephemeral())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn minute_window_fills_and_slides() {
        let tr = tracker();
        let now = t0();
        let today = now.date_naive();

        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(tr.try_reserve_at(0, 100, now, today).unwrap());
        }
        match tr.try_reserve_at(0, 100, now, today) {
            Err(QuotaReject::MinuteExceeded { retry_in }) => {
                assert!(retry_in <= Duration::from_secs(60));
            }
            other => panic!("expected minute_exceeded, got {other:?}"),
        }

        // 61 seconds later the trailing window has reset.
        let later = now + chrono::Duration::seconds(61);
        let r = tr.try_reserve_at(0, 100, later, today).unwrap();
        for h in held {
            tr.cancel(h);
        }
        tr.cancel(r);
    }

    #[test]
    fn day_budget_is_enforced() {
        let tr = tracker();
        let now = t0();
        let today = now.date_naive();
        // Burn the day budget one minute apart so the minute limit never trips.
        for i in 0..25 {
            let at = now + chrono::Duration::minutes(i as i64);
            let r = tr.try_reserve_at(0, 10, at, today).unwrap();
            r.settle();
        }
        let at = now + chrono::Duration::minutes(30);
        assert_eq!(
            tr.try_reserve_at(0, 10, at, today).unwrap_err(),
            QuotaReject::DayRequestsExceeded
        );
    }

    #[test]
    fn token_budget_is_enforced() {
        let tr = tracker();
        let now = t0();
        let today = now.date_naive();
        assert_eq!(
            tr.try_reserve_at(0, 2_000_000, now, today).unwrap_err(),
            QuotaReject::DayTokensExceeded
        );
    }

    #[test]
    fn day_rollover_resets_counters() {
        let tr = tracker();
        let now = t0();
        let today = now.date_naive();
        let r = tr.try_reserve_at(0, 100, now, today).unwrap();
        r.settle();
        assert_eq!(tr.snapshot_at(0, now, today).requests_today, 1);

        let tomorrow = today.succ_opt().unwrap();
        let snap = tr.snapshot_at(0, now + chrono::Duration::days(1), tomorrow);
        assert_eq!(snap.requests_today, 0);
        assert_eq!(snap.tokens_today, 0);
    }

    #[test]
    fn cancel_releases_the_slot() {
        let tr = tracker();
        let now = t0();
        let today = now.date_naive();
        let r = tr.try_reserve_at(0, 100, now, today).unwrap();
        assert_eq!(tr.snapshot_at(0, now, today).requests_today, 1);
        tr.cancel(r);
        assert_eq!(tr.snapshot_at(0, now, today).requests_today, 0);
    }

    #[tokio::test]
    async fn commit_accumulates_tokens() {
        let tr = tracker();
        let now = t0();
        let today = now.date_naive();
        let r = tr.try_reserve_at(0, 100, now, today).unwrap();
        tr.commit(r, 4321).await;
        let snap = tr.snapshot_at(0, now, today);
        assert_eq!(snap.tokens_today, 4321);
        assert_eq!(snap.requests_today, 1);
    }
}
