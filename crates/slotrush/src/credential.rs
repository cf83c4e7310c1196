// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential backends: where a fresh session token pair comes from.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AuthError;
use crate::session::TokenPair;

/// Source of session token pairs. Implementations may be slow (a scripted
/// browser login can take seconds), so callers never hold locks across it.
pub trait CredentialBackend: Send + Sync {
    fn name(&self) -> &str;

    fn acquire_tokens(&self) -> Pin<Box<dyn Future<Output = Result<TokenPair, AuthError>> + Send + '_>>;
}

/// A fixed token pair supplied up front.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    tokens: TokenPair,
}

impl StaticCredentials {
    pub fn new(tokens: TokenPair) -> Self {
        Self { tokens }
    }
}

impl CredentialBackend for StaticCredentials {
    fn name(&self) -> &str {
        "static"
    }

    fn acquire_tokens(&self) -> Pin<Box<dyn Future<Output = Result<TokenPair, AuthError>> + Send + '_>> {
        Box::pin(async move {
            if self.tokens.is_complete() {
                Ok(self.tokens.clone())
            } else {
                Err(AuthError::new("static session tokens are incomplete"))
            }
        })
    }
}

/// Runs an external login command and reads the token pair from its stdout.
#[derive(Debug, Clone)]
pub struct CommandCredentials {
    command: String,
    timeout: Duration,
}

impl CommandCredentials {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self { command: command.into(), timeout }
    }

    async fn run(&self) -> Result<TokenPair, AuthError> {
        tracing::debug!(command = %self.command, "running login command");
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(AuthError::new(format!("failed to spawn login command: {e}"))),
            Err(_) => {
                return Err(AuthError::new(format!(
                    "login command timed out after {}s",
                    self.timeout.as_secs_f64()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::new(format!(
                "login command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        parse_token_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl CredentialBackend for CommandCredentials {
    fn name(&self) -> &str {
        "command"
    }

    fn acquire_tokens(&self) -> Pin<Box<dyn Future<Output = Result<TokenPair, AuthError>> + Send + '_>> {
        Box::pin(self.run())
    }
}

#[derive(Deserialize)]
struct TokenOutput {
    #[serde(alias = "SGJSESSIONID")]
    primary: String,
    #[serde(alias = "WMONID")]
    secondary: String,
}

/// Parse login command output: either a JSON object with `primary` and
/// `secondary` (or the cookie names), or `KEY=VALUE` lines.
pub fn parse_token_output(stdout: &str) -> Result<TokenPair, AuthError> {
    let trimmed = stdout.trim();
    let tokens = if trimmed.starts_with('{') {
        let parsed: TokenOutput = serde_json::from_str(trimmed)
            .map_err(|e| AuthError::new(format!("invalid login command JSON: {e}")))?;
        TokenPair::new(parsed.primary, parsed.secondary)
    } else {
        let mut primary = None;
        let mut secondary = None;
        for line in trimmed.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_owned();
            match key.trim().trim_start_matches("export ").trim() {
                "SGJSESSIONID" | "primary" => primary = Some(value),
                "WMONID" | "secondary" => secondary = Some(value),
                _ => {}
            }
        }
        match (primary, secondary) {
            (Some(p), Some(s)) => TokenPair::new(p, s),
            _ => return Err(AuthError::new("login command output is missing SGJSESSIONID or WMONID")),
        }
    };

    if tokens.is_complete() {
        Ok(tokens)
    } else {
        Err(AuthError::new("login command returned an empty token"))
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
