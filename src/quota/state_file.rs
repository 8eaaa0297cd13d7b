//! Shared persistence for the control plane.
//!
//! Key usage counters, circuit breakers and the rotation cursor all live in
//! one JSON document (`.quota_state.json`) guarded by one mutex. The
//! sequential outer episode loop makes a single lock domain sufficient, and
//! keeping the document whole means every atomic rename leaves a consistent
//! picture of the control plane on disk.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::store::paths::{read_json_or_default, write_json_atomic};

/// Per-key request/token counters. Invariant: counters are zeroed whenever
/// the stored local day differs from the current one; the minute window is a
/// trailing 60-second interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub requests_in_current_minute: u32,
    pub minute_window_start: DateTime<Utc>,
    pub requests_today: u32,
    pub tokens_today: u64,
    pub day_start_local: NaiveDate,
}

impl KeyUsage {
    pub fn fresh(now: DateTime<Utc>, today_local: NaiveDate) -> Self {
        Self {
            requests_in_current_minute: 0,
            minute_window_start: now,
            requests_today: 0,
            tokens_today: 0,
            day_start_local: today_local,
        }
    }
}

/// Persisted circuit breaker state for one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub failure_count: u32,
    pub is_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_time: Option<DateTime<Utc>>,
    /// How many times this breaker has opened since the counter was last
    /// cleared by a success ≥ 24 h after the previous clear.
    pub consecutive_open_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// When `consecutive_open_count` was last reset.
    pub last_counter_reset: DateTime<Utc>,
}

impl BreakerState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            failure_count: 0,
            is_open: false,
            opened_at: None,
            recovery_time: None,
            consecutive_open_count: 0,
            last_success: None,
            last_counter_reset: now,
        }
    }
}

/// The whole `.quota_state.json` document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ControlPlaneState {
    #[serde(default)]
    pub usage: FxHashMap<usize, KeyUsage>,
    #[serde(default)]
    pub breakers: FxHashMap<usize, BreakerState>,
    #[serde(default)]
    pub next_key_index: usize,
}

/// Owner of the control-plane document: one mutex, one file.
///
/// The quota tracker, breaker registry and rotation manager each hold an
/// `Arc<StateFile>` and mutate their section through [`StateFile::with`];
/// [`StateFile::persist`] snapshots under the lock and writes atomically.
pub struct StateFile {
    path: PathBuf,
    state: Mutex<ControlPlaneState>,
}

impl StateFile {
    /// Load persisted state from `path`; a missing or corrupt file starts the
    /// control plane from empty state.
    pub async fn load(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let state: ControlPlaneState = read_json_or_default(&path).await;
        Arc::new(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// In-memory state file for tests and embedders that do not persist.
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self {
            path: PathBuf::new(),
            state: Mutex::new(ControlPlaneState::default()),
        })
    }

    /// Run `f` with exclusive access to the document.
    pub fn with<R>(&self, f: impl FnOnce(&mut ControlPlaneState) -> R) -> R {
        let mut guard = self.state.lock().expect("control plane lock poisoned");
        f(&mut guard)
    }

    /// Atomically write the current document to disk.
    pub async fn persist(&self) -> std::io::Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let snapshot = self.with(|s| s.clone());
        write_json_atomic(&self.path, &snapshot).await
    }
}
