//! Round-robin key rotation over the control plane.
//!
//! The manager walks the key list starting at a persisted cursor so restarts
//! do not stampede one key, skipping keys whose breaker is open or whose
//! quota rejects the reservation. The caller holds the returned reservation
//! for the duration of the model call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::ApiKey;
use crate::quota::breaker::CircuitBreakerRegistry;
use crate::quota::state_file::StateFile;
use crate::quota::usage::{QuotaReject, QuotaTracker, Reservation};

/// Why one key was passed over during rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SkipReason {
    BreakerOpen,
    Quota(QuotaReject),
}

/// All keys were unusable for this rotation pass.
#[derive(Debug)]
pub struct NoKeyAvailable {
    /// Per-key skip reasons in the order they were tried.
    pub skipped: Vec<(usize, SkipReason)>,
}

impl NoKeyAvailable {
    /// True when every key's daily request or token budget is spent and the
    /// run cannot proceed today.
    pub fn all_daily_exhausted(&self) -> bool {
        !self.skipped.is_empty()
            && self.skipped.iter().all(|(_, r)| {
                matches!(
                    r,
                    SkipReason::Quota(
                        QuotaReject::DayRequestsExceeded | QuotaReject::DayTokensExceeded
                    )
                )
            })
    }

    /// Shortest wait until some key's minute window reopens, when the only
    /// obstacle is per-minute throttling.
    pub fn min_minute_wait(&self) -> Option<Duration> {
        self.skipped
            .iter()
            .filter_map(|(_, r)| match r {
                SkipReason::Quota(QuotaReject::MinuteExceeded { retry_in }) => Some(*retry_in),
                _ => None,
            })
            .min()
    }

    /// True when at least one key was skipped only because its breaker is open.
    pub fn any_breaker_open(&self) -> bool {
        self.skipped
            .iter()
            .any(|(_, r)| matches!(r, SkipReason::BreakerOpen))
    }
}

impl std::fmt::Display for NoKeyAvailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no API key available (")?;
        for (i, (key_id, reason)) in self.skipped.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match reason {
                SkipReason::BreakerOpen => write!(f, "key {key_id}: breaker open")?,
                SkipReason::Quota(reject) => write!(f, "key {key_id}: {reject}")?,
            }
        }
        write!(f, ")")
    }
}

/// A key leased for one model call, with its quota reservation.
#[derive(Debug)]
pub struct LeasedKey {
    pub key: ApiKey,
    pub reservation: Reservation,
}

/// Round-robins across N keys, skipping open breakers and spent quotas.
pub struct KeyRotationManager {
    keys: Vec<ApiKey>,
    tracker: Arc<QuotaTracker>,
    breakers: Arc<CircuitBreakerRegistry>,
    file: Arc<StateFile>,
}

impl KeyRotationManager {
    pub fn new(
        keys: Vec<ApiKey>,
        tracker: Arc<QuotaTracker>,
        breakers: Arc<CircuitBreakerRegistry>,
        file: Arc<StateFile>,
    ) -> Self {
        Self {
            keys,
            tracker,
            breakers,
            file,
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Lease the next usable key, reserving one request and `expected_tokens`
    /// against it. Iterates at most once around the key list.
    ///
    /// `min_requests_remaining` is the quota-preservation floor: a key whose
    /// remaining daily budget is below it is passed over, so an episode's
    /// opening call never lands on a key that cannot fund the whole episode.
    pub fn get_next_available(
        &self,
        expected_tokens: u64,
        min_requests_remaining: u32,
    ) -> Result<LeasedKey, NoKeyAvailable> {
        let start = self.file.with(|s| s.next_key_index % self.keys.len().max(1));
        let mut skipped = Vec::new();
        let now = Utc::now();

        for offset in 0..self.keys.len() {
            let idx = (start + offset) % self.keys.len();
            let key = &self.keys[idx];

            if !self.breakers.can_attempt_at(key.id, now) {
                skipped.push((key.id, SkipReason::BreakerOpen));
                continue;
            }
            if self.tracker.requests_remaining_today(key.id) < min_requests_remaining {
                skipped.push((key.id, SkipReason::Quota(QuotaReject::DayRequestsExceeded)));
                continue;
            }
            match self.tracker.try_reserve(key.id, expected_tokens) {
                Ok(reservation) => {
                    // Sticky cursor: stay on this key until it becomes
                    // unusable, and persist it so a restart resumes here
                    // instead of walking the list from zero.
                    self.file.with(|s| s.next_key_index = idx);
                    tracing::debug!(key_id = key.id, "leased API key");
                    return Ok(LeasedKey {
                        key: key.clone(),
                        reservation,
                    });
                }
                Err(reject) => skipped.push((key.id, SkipReason::Quota(reject))),
            }
        }
        Err(NoKeyAvailable { skipped })
    }

    /// Forward a failed call to the key's circuit breaker.
    pub fn mark_key_failure(&self, key_id: usize) {
        self.breakers.record_failure(key_id);
    }

    /// Forward a successful call to the key's circuit breaker. Committing the
    /// reservation's token cost is the quota tracker's job and happens at the
    /// gateway.
    pub fn mark_key_success(&self, key_id: usize) {
        self.breakers.record_success(key_id);
    }
}
