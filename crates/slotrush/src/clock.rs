// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wall-clock access behind a trait so deadline logic can run on virtual time.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of wall-clock time and suspension.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// One iteration of a busy-poll. Must not suspend.
    fn spin(&self) {
        std::hint::spin_loop();
    }
}

/// The real clock: `chrono::Utc` plus tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Time left until `target`, or `None` once it has been reached.
pub fn remaining(target: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (target - now).to_std().ok().filter(|d| !d.is_zero())
}

/// Time elapsed since `earlier`, saturating at zero.
pub fn elapsed_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or_default()
}
