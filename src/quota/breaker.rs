//! Per-key circuit breakers with exponentially growing cool-down windows.
//!
//! A breaker opens after three consecutive failures. The cool-down doubles
//! with every consecutive open (30 min, 60 min, 120 min cap) and the
//! first attempt after `recovery_time` elapses is a probe: the breaker
//! closes optimistically and re-opens quickly if the probe fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::CircuitSettings;
use crate::quota::state_file::{BreakerState, StateFile};

const FAILURES_TO_OPEN: u32 = 3;

/// A success this long after the last reset clears `consecutive_open_count`.
fn counter_reset_after() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Registry of one circuit breaker per API key.
pub struct CircuitBreakerRegistry {
    settings: CircuitSettings,
    file: Arc<StateFile>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: CircuitSettings, file: Arc<StateFile>) -> Self {
        Self { settings, file }
    }

    /// Record one failure against `key_id`, opening the breaker at the third.
    pub fn record_failure(&self, key_id: usize) {
        self.record_failure_at(key_id, Utc::now());
    }

    /// Deterministic variant of [`record_failure`](Self::record_failure).
    pub fn record_failure_at(&self, key_id: usize, now: DateTime<Utc>) {
        let settings = self.settings;
        self.file.with(|state| {
            let breaker = state
                .breakers
                .entry(key_id)
                .or_insert_with(|| BreakerState::fresh(now));
            breaker.failure_count += 1;
            if breaker.failure_count >= FAILURES_TO_OPEN && !breaker.is_open {
                let cooldown = cooldown_for(settings, breaker.consecutive_open_count);
                breaker.is_open = true;
                breaker.opened_at = Some(now);
                breaker.recovery_time =
                    Some(now + chrono::Duration::from_std(cooldown).unwrap_or_default());
                breaker.consecutive_open_count += 1;
                tracing::warn!(
                    key_id,
                    cooldown_secs = cooldown.as_secs(),
                    consecutive_opens = breaker.consecutive_open_count,
                    "circuit breaker opened"
                );
            }
        });
    }

    /// Record a success: close the breaker and clear failures. A success 24 h
    /// or more after the last counter reset also clears the consecutive-open
    /// counter.
    pub fn record_success(&self, key_id: usize) {
        self.record_success_at(key_id, Utc::now());
    }

    pub fn record_success_at(&self, key_id: usize, now: DateTime<Utc>) {
        self.file.with(|state| {
            let breaker = state
                .breakers
                .entry(key_id)
                .or_insert_with(|| BreakerState::fresh(now));
            breaker.failure_count = 0;
            breaker.is_open = false;
            breaker.opened_at = None;
            breaker.recovery_time = None;
            breaker.last_success = Some(now);
            if now - breaker.last_counter_reset >= counter_reset_after() {
                breaker.consecutive_open_count = 0;
                breaker.last_counter_reset = now;
            }
        });
    }

    /// Whether a call may be attempted on `key_id` right now. An open breaker
    /// whose recovery time has elapsed closes and admits the call as a probe.
    pub fn can_attempt(&self, key_id: usize) -> bool {
        self.can_attempt_at(key_id, Utc::now())
    }

    pub fn can_attempt_at(&self, key_id: usize, now: DateTime<Utc>) -> bool {
        self.file.with(|state| {
            let breaker = state
                .breakers
                .entry(key_id)
                .or_insert_with(|| BreakerState::fresh(now));
            if !breaker.is_open {
                return true;
            }
            match breaker.recovery_time {
                Some(recovery) if now >= recovery => {
                    breaker.is_open = false;
                    breaker.failure_count = 0;
                    tracing::info!(key_id, "circuit breaker probe admitted");
                    true
                }
                _ => false,
            }
        })
    }

    /// Time until the key's breaker admits a probe; `None` when it is closed.
    pub fn time_until_recovery(&self, key_id: usize, now: DateTime<Utc>) -> Option<Duration> {
        self.file.with(|state| {
            let breaker = state.breakers.get(&key_id)?;
            if !breaker.is_open {
                return None;
            }
            let recovery = breaker.recovery_time?;
            Some((recovery - now).to_std().unwrap_or_default())
        })
    }

    /// Operational escape hatch: close one breaker and clear its counters.
    pub fn force_reset(&self, key_id: usize) {
        let now = Utc::now();
        self.file.with(|state| {
            state.breakers.insert(key_id, BreakerState::fresh(now));
        });
        tracing::info!(key_id, "circuit breaker force-reset");
    }

    /// Operational escape hatch: close all breakers.
    pub fn force_reset_all(&self) {
        let now = Utc::now();
        self.file.with(|state| {
            for breaker in state.breakers.values_mut() {
                *breaker = BreakerState::fresh(now);
            }
        });
        tracing::info!("all circuit breakers force-reset");
    }
}

fn cooldown_for(settings: CircuitSettings, consecutive_open_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(consecutive_open_count.min(16));
    settings
        .initial_cooldown
        .saturating_mul(factor)
        .min(settings.max_cooldown)
}
