// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Credential backend failure. Cloneable so that every caller awaiting a
/// shared in-flight login receives the same error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    pub message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "login failed: {}", self.message)
    }
}

impl std::error::Error for AuthError {}

/// Coarse cause of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Status,
    Body,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Status => "status",
            Self::Body => "body",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request that never produced a response body.
///
/// The message text is what the dispatcher's failure classifier inspects,
/// so constructors embed the conventional markers (`timed out`,
/// `HTTP Error <code>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(detail: impl fmt::Display) -> Self {
        Self::new(TransportErrorKind::Timeout, format!("request timed out: {detail}"))
    }

    pub fn status(code: u16) -> Self {
        Self::new(TransportErrorKind::Status, format!("HTTP Error {code}"))
    }

    /// Map a reqwest error, flattening its source chain into the message.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let mut detail = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }

        if err.is_timeout() {
            Self::timeout(detail)
        } else if err.is_connect() {
            Self::new(TransportErrorKind::Connect, format!("connection failed: {detail}"))
        } else if err.is_body() || err.is_decode() {
            Self::new(TransportErrorKind::Body, detail)
        } else if let Some(status) = err.status() {
            Self::new(TransportErrorKind::Status, format!("HTTP Error {}: {detail}", status.as_u16()))
        } else {
            Self::new(TransportErrorKind::Other, detail)
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Raised when the remote reports that the registration window is closed.
/// Continuing after this is pointless, so it ends the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopProcessing {
    pub resource_id: String,
    pub detail: String,
}

impl fmt::Display for StopProcessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registration period closed (item {}): {}", self.resource_id, self.detail)
    }
}

impl std::error::Error for StopProcessing {}

/// Why a run was terminated with a failing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PeriodClosed,
    AuthExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeriodClosed => "period_closed",
            Self::AuthExhausted => "auth_exhausted",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every work item was acquired.
    Completed,
    /// A fatal outcome stopped the run.
    Fatal { reason: StopReason, detail: String },
    /// The run was cancelled from outside.
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Fatal { .. } => "fatal",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Fatal { .. } => 1,
            Self::Cancelled => 130,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal { reason, detail } => write!(f, "fatal ({reason}): {detail}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<StopProcessing> for RunOutcome {
    fn from(stop: StopProcessing) -> Self {
        Self::Fatal { reason: StopReason::PeriodClosed, detail: stop.to_string() }
    }
}

impl From<AuthError> for RunOutcome {
    fn from(err: AuthError) -> Self {
        Self::Fatal { reason: StopReason::AuthExhausted, detail: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
