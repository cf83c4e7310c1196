// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cycle loop: order the remaining work, pick a cadence from the health
//! state, send, classify, and repeat until the work set is empty or a fatal
//! outcome stops the run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{apply_outcome, classify, Outcome};
use crate::clock::elapsed_since;
use crate::context::RunContext;
use crate::dispatch::{Dispatcher, Phase};
use crate::error::{RunOutcome, StopProcessing};
use crate::health::{recover_from_blank_response, HealthState};
use crate::session::RefreshReason;
use crate::workset::{WorkItem, WorkSet};

/// Sending policy for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Opening burst: every item, short jittered spacing, first phase.
    First,
    /// Peak load: a few items with a fixed delay between them.
    PeakLoad { limit: usize },
    /// Overloaded: only the first `limit` items.
    Overloaded { limit: usize },
    /// Every item with attempt-banded spacing.
    Normal,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::PeakLoad { .. } => "peak_load",
            Self::Overloaded { .. } => "overloaded",
            Self::Normal => "normal",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::First => Phase::First,
            _ => Phase::Steady,
        }
    }

    /// How many of `remaining` items this cycle sends.
    pub fn batch_size(&self, remaining: usize) -> usize {
        match self {
            Self::First | Self::Normal => remaining,
            Self::PeakLoad { limit } | Self::Overloaded { limit } => (*limit).min(remaining),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the cadence for a cycle. Peak load outranks plain overload.
pub fn select_cadence(
    first_cycle: bool,
    health: &HealthState,
    concurrency: usize,
    peak_limit: usize,
    remaining: usize,
) -> Cadence {
    if first_cycle {
        Cadence::First
    } else if health.peak_load_detected {
        Cadence::PeakLoad { limit: peak_limit.min(remaining) }
    } else if health.overloaded {
        Cadence::Overloaded { limit: concurrency.max(1).min(remaining) }
    } else {
        Cadence::Normal
    }
}

pub struct CycleScheduler {
    ctx: RunContext,
    dispatcher: Arc<Dispatcher>,
    started: bool,
}

impl CycleScheduler {
    pub fn new(ctx: RunContext, dispatcher: Arc<Dispatcher>) -> Self {
        Self { ctx, dispatcher, started: false }
    }

    /// Run cycles until `work` is empty, a fatal outcome, or cancellation.
    pub async fn run(&mut self, work: &mut WorkSet) -> RunOutcome {
        loop {
            if work.is_empty() {
                return RunOutcome::Completed;
            }
            if self.ctx.shutdown.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            if let Err(stop) = self.run_cycle(work).await {
                tracing::error!(err = %stop, "stopping run");
                return stop.into();
            }
            if work.is_empty() {
                return RunOutcome::Completed;
            }

            let wait = self.inter_cycle_wait();
            tracing::debug!(wait_ms = wait.as_millis() as u64, "waiting before next cycle");
            if !self.pause(wait).await {
                return RunOutcome::Cancelled;
            }
        }
    }

    /// One pass over the remaining work. Counts as exactly one attempt.
    pub async fn run_cycle(&mut self, work: &mut WorkSet) -> Result<(), StopProcessing> {
        let attempt = self.ctx.stats.record_attempt();
        let settings = Arc::clone(&self.ctx.settings);
        let pacing = &settings.pacing;

        let cadence = select_cadence(
            !self.started,
            &self.ctx.health.snapshot(),
            settings.concurrency,
            pacing.peak_item_limit,
            work.len(),
        );
        self.started = true;

        let ordered = work.ordered(&settings.priority);
        let batch = cadence.batch_size(ordered.len());
        tracing::info!(attempt, %cadence, batch, remaining = work.len(), "starting cycle");

        for (i, item) in ordered.into_iter().take(batch).enumerate() {
            if !work.contains(&item.resource_id) {
                continue;
            }
            if i > 0 {
                let delay = match cadence {
                    Cadence::First => pacing.first_interval(),
                    Cadence::PeakLoad { .. } => pacing.peak_item_delay(),
                    Cadence::Overloaded { .. } | Cadence::Normal => pacing.band_for(attempt).sample(),
                };
                if !self.pause(delay).await {
                    break;
                }
            }
            if cadence != Cadence::First && !self.ctx.session.is_valid() {
                self.ctx.session.signal_refresh(RefreshReason::SessionInvalid);
                if !self.pause(pacing.invalid_session_pause()).await {
                    break;
                }
            }

            let shutdown = self.ctx.shutdown.clone();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.dispatch_item(work, &item, cadence.phase()) => result?,
            }
        }

        if matches!(cadence, Cadence::PeakLoad { .. }) {
            self.ctx.health.clear_peak_load();
        }
        let health = self.ctx.health.evaluate();
        if health.blank_response_detected && !self.ctx.shutdown.is_cancelled() {
            recover_from_blank_response(&self.ctx.health, &self.ctx.session, self.ctx.clock.as_ref()).await;
        }
        Ok(())
    }

    async fn dispatch_item(
        &self,
        work: &mut WorkSet,
        item: &WorkItem,
        phase: Phase,
    ) -> Result<(), StopProcessing> {
        match self.dispatcher.send(item, phase).await {
            Ok(body) => {
                let outcome = classify(&body);
                tracing::debug!(item = %item, %outcome, "classified response");
                if outcome != Outcome::Success {
                    self.ctx.stats.record_failure();
                }
                apply_outcome(&self.ctx, work, item, outcome, &body)
            }
            Err(e) => {
                self.ctx.stats.record_failure();
                tracing::debug!(item = %item, err = %e, "send failed, will retry next cycle");
                Ok(())
            }
        }
    }

    /// Wait between cycles: the attempt band (short just after the target)
    /// plus the health backoff.
    pub fn inter_cycle_wait(&self) -> Duration {
        let settings = &self.ctx.settings;
        let now = self.ctx.clock.now();
        let since_target = (now >= settings.target).then(|| elapsed_since(settings.target, now));
        let band = settings.pacing.cycle_band(self.ctx.stats.attempts(), since_target);
        band.sample() + self.ctx.health.snapshot().backoff
    }

    /// Sleep on the run clock. Returns false if cancelled first.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.ctx.shutdown.is_cancelled();
        }
        tokio::select! {
            _ = self.ctx.shutdown.cancelled() => false,
            _ = self.ctx.clock.sleep(duration) => true,
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
