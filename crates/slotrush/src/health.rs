// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote health tracking: consecutive failures, backoff, overload and
//! peak-load flags, and the blank-response recovery protocol.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::Clock;
use crate::session::{RefreshReason, SessionGuardian};

/// Consecutive failures at which the remote is considered overloaded.
pub const OVERLOAD_THRESHOLD: u32 = 3;

const BACKOFF_STEP: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const BLANK_CHECKS: u32 = 3;
const BLANK_SETTLE: Duration = Duration::from_millis(500);

/// Backoff for a failure streak: half a second per failure, capped at 5 s.
pub fn backoff_for(consecutive_errors: u32) -> Duration {
    (BACKOFF_STEP * consecutive_errors).min(MAX_BACKOFF)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthState {
    pub consecutive_errors: u32,
    pub backoff: Duration,
    pub overloaded: bool,
    pub peak_load_detected: bool,
    pub blank_response_detected: bool,
}

impl HealthState {
    pub fn backoff_seconds(&self) -> f64 {
        self.backoff.as_secs_f64()
    }
}

/// Wall-clock interval around the deadline where overload means peak load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeakWindow {
    pub fn around(target: DateTime<Utc>, before: Duration, after: Duration) -> Self {
        let before = TimeDelta::from_std(before).unwrap_or(TimeDelta::zero());
        let after = TimeDelta::from_std(after).unwrap_or(TimeDelta::zero());
        Self { start: target - before, end: target + after }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }
}

pub struct HealthMonitor {
    peak: PeakWindow,
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    pub fn new(peak: PeakWindow) -> Self {
        Self { peak, state: Mutex::new(HealthState::default()) }
    }

    /// Count a server-overload failure. Inside the peak window this also
    /// raises the peak-load flag. Returns the new streak length.
    pub fn record_overload(&self, now: DateTime<Utc>) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_errors += 1;
        let in_peak = self.peak.contains(now);
        if in_peak {
            state.peak_load_detected = true;
        }
        tracing::warn!(consecutive_errors = state.consecutive_errors, in_peak, "server overload detected");
        state.consecutive_errors
    }

    /// Any response at all ends the failure streak.
    pub fn record_response(&self) {
        self.state.lock().consecutive_errors = 0;
    }

    pub fn mark_blank_response(&self) {
        self.state.lock().blank_response_detected = true;
    }

    pub fn clear_peak_load(&self) {
        self.state.lock().peak_load_detected = false;
    }

    pub fn clear_blank_response(&self) {
        self.state.lock().blank_response_detected = false;
    }

    /// Apply the per-cycle rules and return the resulting state.
    ///
    /// Overloaded and backoff depend only on the current streak: at least
    /// [`OVERLOAD_THRESHOLD`] sets overloaded with a proportional backoff,
    /// anything shorter clears both.
    pub fn evaluate(&self) -> HealthState {
        let mut state = self.state.lock();
        let n = state.consecutive_errors;
        let overloaded = n >= OVERLOAD_THRESHOLD;
        match (state.overloaded, overloaded) {
            (false, true) => tracing::warn!(consecutive_errors = n, "remote marked overloaded"),
            (true, false) => tracing::info!(consecutive_errors = n, "remote recovered"),
            _ => {}
        }
        state.overloaded = overloaded;
        state.backoff = if overloaded { backoff_for(n) } else { Duration::ZERO };
        state.clone()
    }

    pub fn snapshot(&self) -> HealthState {
        self.state.lock().clone()
    }
}

/// Blank-response protocol: invalidate and refresh the session, then poll
/// `check()` up to three times with growing pauses. Best effort; the flag is
/// cleared whether or not the session came back. Returns whether it did.
pub async fn recover_from_blank_response(
    health: &HealthMonitor,
    session: &Arc<SessionGuardian>,
    clock: &dyn Clock,
) -> bool {
    tracing::warn!("blank response detected, starting recovery");
    session.invalidate(RefreshReason::BlankResponse);
    session.signal_refresh(RefreshReason::BlankResponse);
    clock.sleep(BLANK_SETTLE).await;

    let mut recovered = false;
    for round in 1..=BLANK_CHECKS {
        if session.check().await {
            recovered = true;
            break;
        }
        session.signal_refresh(RefreshReason::BlankResponse);
        clock.sleep(BLANK_SETTLE * round).await;
    }

    health.clear_blank_response();
    if recovered {
        tracing::info!("session confirmed after blank response");
    } else {
        tracing::warn!("session not confirmed after blank response, continuing");
    }
    recovered
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
