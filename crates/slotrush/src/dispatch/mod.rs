// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request dispatch: one network call per work item, with phase-specific
//! timeouts and at most one immediate re-send after a first-phase failure.

pub mod http;
pub mod payload;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::context::RunContext;
use crate::error::{TransportError, TransportErrorKind};
use crate::session::RefreshReason;
use crate::workset::WorkItem;

use self::http::{Transport, WireRequest};
use self::payload::PayloadCache;

/// Which part of the run a send belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The opening burst: short timeout, no concurrency gate.
    First,
    /// Everything after: standard timeout, gated by the concurrency cap.
    Steady,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Steady => "steady",
        }
    }

    /// Phase of the single re-send allowed after a failure, if any.
    pub fn retry_phase(&self) -> Option<Phase> {
        match self {
            Self::First => Some(Self::Steady),
            Self::Steady => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a transport failure, derived from its error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    AuthFailure,
    ServerOverload,
    Blank,
    Generic,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::ServerOverload => "server_overload",
            Self::Blank => "blank",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const AUTH_MARKERS: &[&str] = &["HTTP Error 401", "HTTP Error 403", "권한이 없습니다", "로그인", "세션"];

const OVERLOAD_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "http error 500",
    "http error 502",
    "http error 504",
    "bad gateway",
    "gateway time-out",
    "overloaded",
];

const BLANK_MARKERS: &[&str] = &["blank", "empty"];

/// Classify transport error text. First match wins, in the order
/// auth, overload, blank.
pub fn classify_failure(text: &str) -> FailureKind {
    if AUTH_MARKERS.iter().any(|m| text.contains(m)) {
        return FailureKind::AuthFailure;
    }
    let lower = text.to_lowercase();
    if OVERLOAD_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::ServerOverload
    } else if BLANK_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::Blank
    } else {
        FailureKind::Generic
    }
}

/// A send that produced no response, after side effects were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub kind: FailureKind,
    pub source: TransportError,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.source)
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

pub struct Dispatcher {
    ctx: RunContext,
    transport: Arc<dyn Transport>,
    payloads: PayloadCache,
    /// Caps concurrent steady-phase sends across callers. The scheduler
    /// awaits its sends one at a time, so the gate only contends when
    /// several tasks share the dispatcher; first-phase sends skip it.
    steady_permits: Semaphore,
}

impl Dispatcher {
    pub fn new(ctx: &RunContext, transport: Arc<dyn Transport>) -> Self {
        let settings = &ctx.settings;
        Self {
            payloads: PayloadCache::new(settings.campus_code.clone()),
            steady_permits: Semaphore::new(settings.concurrency.max(1)),
            ctx: ctx.clone(),
            transport,
        }
    }

    /// Pre-encode payloads. Returns the number cached.
    pub fn warm<'a>(&self, items: impl IntoIterator<Item = &'a WorkItem>) -> usize {
        let cached = self.payloads.warm(items);
        tracing::info!(cached, "request payloads prepared");
        cached
    }

    pub fn timeout_for(&self, phase: Phase) -> Duration {
        match phase {
            Phase::First => self.ctx.settings.first_timeout,
            Phase::Steady => self.ctx.settings.steady_timeout,
        }
    }

    /// Send one item. Returns the raw response text.
    ///
    /// A first-phase failure is re-sent once in the steady phase; the
    /// failure's side effects are applied for every failed attempt.
    pub async fn send(&self, item: &WorkItem, phase: Phase) -> Result<String, DispatchError> {
        let mut attempt = phase;
        loop {
            match self.send_once(item, attempt).await {
                Ok(body) => {
                    self.ctx.health.record_response();
                    return Ok(body);
                }
                Err(source) => {
                    let kind = self.apply_failure(item, attempt, &source);
                    let Some(next) = attempt.retry_phase() else {
                        return Err(DispatchError { kind, source });
                    };
                    tracing::info!(item = %item, "re-sending after first-phase failure");
                    if !self.ctx.session.is_valid() {
                        self.ctx.session.signal_refresh(RefreshReason::SessionInvalid);
                        self.ctx.clock.sleep(self.ctx.settings.pacing.retry_pause()).await;
                    }
                    attempt = next;
                }
            }
        }
    }

    async fn send_once(&self, item: &WorkItem, phase: Phase) -> Result<String, TransportError> {
        let _permit = match phase {
            Phase::First => None,
            Phase::Steady => Some(self.steady_permits.acquire().await.map_err(|_| {
                TransportError::new(TransportErrorKind::Other, "dispatcher is shut down")
            })?),
        };

        let body = self.payloads.get(item);
        let cookie = self.ctx.session.snapshot().cookie_header().unwrap_or_default();
        let timeout = self.timeout_for(phase);

        let started = Instant::now();
        let result = self
            .transport
            .post_form(WireRequest { body: &*body, cookie: &cookie, timeout })
            .await;
        let latency = started.elapsed();
        self.ctx.stats.record_latency(latency);

        tracing::debug!(
            item = %item,
            %phase,
            latency_ms = latency.as_secs_f64() * 1000.0,
            ok = result.is_ok(),
            "request complete"
        );
        result
    }

    fn apply_failure(&self, item: &WorkItem, phase: Phase, err: &TransportError) -> FailureKind {
        let kind = classify_failure(&err.message);
        tracing::warn!(item = %item, %phase, %kind, err = %err, "request failed");
        match kind {
            FailureKind::AuthFailure => {
                self.ctx.session.invalidate(RefreshReason::AuthFailure);
                self.ctx.session.signal_refresh(RefreshReason::AuthFailure);
            }
            FailureKind::ServerOverload => {
                self.ctx.health.record_overload(self.ctx.clock.now());
            }
            FailureKind::Blank => self.ctx.health.mark_blank_response(),
            FailureKind::Generic => {}
        }
        kind
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
