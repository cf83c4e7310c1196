// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response classification.
//!
//! [`classify`] is pure: it maps a response body to an [`Outcome`] by literal
//! marker match in a fixed precedence. [`apply_outcome`] carries out the
//! outcome's effects on the run state.

use std::fmt;

use crate::alert::{self, AlertPriority};
use crate::context::RunContext;
use crate::error::StopProcessing;
use crate::session::RefreshReason;
use crate::workset::{WorkItem, WorkSet};

const SESSION_EXPIRED_MARKERS: &[&str] = &["-3000", "세션", "로그인"];
const FULL_MARKER: &str = "초과";
const PERIOD_CLOSED_MARKER: &str = "기간";
const SUCCESS_MARKER: &str = "true";

/// Maximum characters of an unrecognised body that get logged.
pub const LOG_BODY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    AlreadyFull,
    PeriodClosed,
    SessionExpired,
    BlankResponse,
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AlreadyFull => "already_full",
            Self::PeriodClosed => "period_closed",
            Self::SessionExpired => "session_expired",
            Self::BlankResponse => "blank_response",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a response body. Session expiry is checked first and success
/// last, so a body carrying both a failure marker and `true` is a failure.
pub fn classify(body: &str) -> Outcome {
    if SESSION_EXPIRED_MARKERS.iter().any(|m| body.contains(m)) {
        Outcome::SessionExpired
    } else if body.contains(FULL_MARKER) {
        Outcome::AlreadyFull
    } else if body.contains(PERIOD_CLOSED_MARKER) {
        Outcome::PeriodClosed
    } else if body.contains(SUCCESS_MARKER) {
        Outcome::Success
    } else if body.trim().is_empty() {
        Outcome::BlankResponse
    } else {
        Outcome::Unknown
    }
}

/// At most `max_chars` characters of `body`, cut on a char boundary.
pub fn truncate(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Apply an outcome's effects for `item`.
///
/// Returns `Err(StopProcessing)` for [`Outcome::PeriodClosed`], which ends
/// the run; every other outcome is absorbed here.
pub fn apply_outcome(
    ctx: &RunContext,
    work: &mut WorkSet,
    item: &WorkItem,
    outcome: Outcome,
    body: &str,
) -> Result<(), StopProcessing> {
    match outcome {
        Outcome::SessionExpired => {
            tracing::warn!(item = %item, "session expired");
            ctx.session.invalidate(RefreshReason::SessionExpired);
            ctx.alerts.notify(alert::session_expired(item), AlertPriority::High);
            ctx.session.signal_refresh(RefreshReason::SessionExpired);
        }
        Outcome::AlreadyFull => {
            tracing::info!(item = %item, "item is full");
            if ctx.settings.alert_on_full {
                ctx.alerts.notify(alert::item_full(item), AlertPriority::Low);
            }
        }
        Outcome::PeriodClosed => {
            tracing::error!(item = %item, body = truncate(body, LOG_BODY_LIMIT), "registration period closed");
            ctx.alerts.notify(alert::period_closed(item), AlertPriority::Urgent);
            return Err(StopProcessing {
                resource_id: item.resource_id.clone(),
                detail: truncate(body, LOG_BODY_LIMIT).to_owned(),
            });
        }
        Outcome::Success => {
            work.remove(&item.resource_id);
            let successes = ctx.stats.record_success();
            tracing::info!(item = %item, successes, remaining = work.len(), "registered");
            ctx.alerts.notify(alert::item_acquired(item), AlertPriority::Urgent);
        }
        Outcome::BlankResponse => {
            tracing::warn!(item = %item, "blank response");
            ctx.health.mark_blank_response();
        }
        Outcome::Unknown => {
            tracing::warn!(item = %item, body = truncate(body, LOG_BODY_LIMIT), "unrecognised response");
            let trimmed = body.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
                    tracing::debug!(item = %item, %json, "unrecognised JSON response");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
