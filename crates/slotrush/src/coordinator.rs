// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target instant coordination: tiered waiting and pre-deadline hooks.
//!
//! Waiting happens in three tiers so that the overshoot past the deadline is
//! bounded by the busy-poll resolution rather than timer granularity:
//!
//! - **coarse**: one-second sleeps while more than 10 s remain, with a
//!   progress line every 30 s;
//! - **fine**: sub-second sleeps until 10 ms remain;
//! - **spin**: a non-sleeping poll of the clock for the final stretch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::{elapsed_since, remaining, Clock};

/// Above this much remaining time the coordinator sleeps in coarse steps.
pub const COARSE_THRESHOLD: Duration = Duration::from_secs(10);

/// Below this much remaining time the coordinator busy-polls.
pub const SPIN_THRESHOLD: Duration = Duration::from_millis(10);

const COARSE_STEP: Duration = Duration::from_secs(1);
const FINE_STEP: Duration = Duration::from_millis(100);
const PROGRESS_EVERY: Duration = Duration::from_secs(30);

type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Action fired at a fixed offset before the target instant.
pub struct PrepHook {
    pub name: String,
    pub offset: Duration,
    action: Box<dyn FnOnce() -> HookFuture + Send>,
}

impl PrepHook {
    pub fn new<F, Fut>(name: impl Into<String>, offset: Duration, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self { name: name.into(), offset, action: Box::new(move || Box::pin(action())) }
    }
}

impl std::fmt::Debug for PrepHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrepHook").field("name", &self.name).field("offset", &self.offset).finish()
    }
}

/// Aligns execution to a wall-clock deadline.
pub struct Coordinator {
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Suspend until the clock reads `target` or later. Returns immediately
    /// when the target has already passed.
    pub async fn wait_until(&self, target: DateTime<Utc>) {
        let Some(total) = remaining(target, self.clock.now()) else {
            tracing::debug!(%target, "target already reached");
            return;
        };
        tracing::info!(%target, wait_secs = total.as_secs_f64(), "waiting for target instant");

        let mut last_progress = self.clock.now();
        while let Some(left) = remaining(target, self.clock.now()) {
            if left <= COARSE_THRESHOLD {
                break;
            }
            self.clock.sleep((left - COARSE_THRESHOLD).min(COARSE_STEP)).await;

            let now = self.clock.now();
            if elapsed_since(last_progress, now) >= PROGRESS_EVERY {
                if let Some(left) = remaining(target, now) {
                    tracing::info!(
                        remaining_secs = left.as_secs_f64(),
                        remaining_mins = left.as_secs_f64() / 60.0,
                        "still waiting"
                    );
                }
                last_progress = now;
            }
        }

        if let Some(left) = remaining(target, self.clock.now()) {
            tracing::debug!(remaining_secs = left.as_secs_f64(), "entering final approach");
        }
        while let Some(left) = remaining(target, self.clock.now()) {
            if left <= SPIN_THRESHOLD {
                break;
            }
            self.clock.sleep((left - SPIN_THRESHOLD).min(FINE_STEP)).await;
        }

        while self.clock.now() < target {
            self.clock.spin();
        }

        let overshoot = elapsed_since(target, self.clock.now());
        tracing::info!(overshoot_us = overshoot.as_micros() as u64, "target instant reached");
    }

    /// Fire each hook at `target - hook.offset`, largest offset first.
    ///
    /// Hooks whose instant has passed fire immediately. The first hook error
    /// aborts the remaining hooks and is returned.
    pub async fn prepare(&self, target: DateTime<Utc>, mut hooks: Vec<PrepHook>) -> anyhow::Result<()> {
        hooks.sort_by(|a, b| b.offset.cmp(&a.offset));
        for hook in hooks {
            let offset = TimeDelta::from_std(hook.offset).unwrap_or(TimeDelta::zero());
            self.wait_until(target - offset).await;

            tracing::info!(hook = %hook.name, offset_ms = hook.offset.as_millis() as u64, "running preparation hook");
            let name = hook.name;
            (hook.action)().await.with_context(|| format!("preparation hook {name} failed"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
