// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token state and the guardian that keeps it valid.

pub mod guardian;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use guardian::{GuardianConfig, SessionGuardian};

/// Whether the current token pair is believed to authorize requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

impl Validity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two cookies the remote uses to identify a session.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// `SGJSESSIONID`
    pub primary: String,
    /// `WMONID`
    pub secondary: String,
}

impl TokenPair {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self { primary: primary.into(), secondary: secondary.into() }
    }

    pub fn is_complete(&self) -> bool {
        !self.primary.trim().is_empty() && !self.secondary.trim().is_empty()
    }

    pub fn cookie_header(&self) -> String {
        format!("WMONID={}; SGJSESSIONID={}", self.secondary, self.primary)
    }
}

// Token values stay out of logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("primary", &format_args!("<{} chars>", self.primary.len()))
            .field("secondary", &format_args!("<{} chars>", self.secondary.len()))
            .finish()
    }
}

/// Immutable snapshot of the session, replaced wholesale on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionToken {
    pub tokens: Option<TokenPair>,
    pub validity: Validity,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    pub fn cookie_header(&self) -> Option<String> {
        self.tokens.as_ref().map(TokenPair::cookie_header)
    }
}

/// Lightweight "does this token still work" check against the remote.
pub trait SessionProbe: Send + Sync {
    fn probe<'a>(
        &'a self,
        tokens: &'a TokenPair,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + 'a>>;
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    AuthFailure,
    SessionExpired,
    BlankResponse,
    SessionInvalid,
    Periodic,
}

impl RefreshReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::SessionExpired => "session_expired",
            Self::BlankResponse => "blank_response",
            Self::SessionInvalid => "session_invalid",
            Self::Periodic => "periodic",
        }
    }
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
