// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator alerts. Delivery is fire-and-forget and never blocks the caller.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::http::ensure_crypto_provider;
use crate::stats::RunReport;
use crate::workset::{WorkItem, WorkSet};

const NTFY_SERVER: &str = "https://ntfy.sh";
const NTFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Push priority, mapped onto ntfy's five levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Min,
    Low,
    Default,
    High,
    Urgent,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Low => "low",
            Self::Default => "default",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for operator alerts.
pub trait AlertSink: Send + Sync {
    /// Queue a message for delivery. Must return without waiting on I/O.
    fn notify(&self, message: String, priority: AlertPriority);
}

/// Writes alerts to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn notify(&self, message: String, priority: AlertPriority) {
        tracing::info!(%priority, "alert: {message}");
    }
}

/// Publishes alerts to an ntfy topic.
#[derive(Debug, Clone)]
pub struct NtfyAlerts {
    client: reqwest::Client,
    url: String,
}

impl NtfyAlerts {
    pub fn new(topic: &str) -> anyhow::Result<Self> {
        Self::with_server(NTFY_SERVER, topic)
    }

    pub fn with_server(server: &str, topic: &str) -> anyhow::Result<Self> {
        let topic = topic.trim().trim_matches('/');
        if topic.is_empty() {
            anyhow::bail!("ntfy topic must not be empty");
        }
        ensure_crypto_provider();
        let client = reqwest::Client::builder().timeout(NTFY_TIMEOUT).build()?;
        Ok(Self { client, url: format!("{}/{topic}", server.trim_end_matches('/')) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl AlertSink for NtfyAlerts {
    fn notify(&self, message: String, priority: AlertPriority) {
        tracing::info!(%priority, "alert: {message}");
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime available, alert not delivered");
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        handle.spawn(async move {
            let result = client
                .post(&url)
                .header("Priority", priority.as_str())
                .header("Title", "slotrush")
                .body(message)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(e) = result {
                tracing::warn!(err = %e, "alert delivery failed");
            }
        });
    }
}

pub fn run_started(work: &WorkSet) -> String {
    let items: Vec<String> = work.iter().map(ToString::to_string).collect();
    format!("Registration run started for {} item(s): {}", work.len(), items.join(", "))
}

pub fn item_acquired(item: &WorkItem) -> String {
    format!("Registered {item}")
}

pub fn item_full(item: &WorkItem) -> String {
    format!("{item} is full, will keep trying")
}

pub fn session_expired(item: &WorkItem) -> String {
    format!("Session expired while sending {item}, refreshing login")
}

pub fn period_closed(item: &WorkItem) -> String {
    format!("Registration period closed (seen on {item}), stopping")
}

pub fn refresh_failing(consecutive: u32) -> String {
    format!("Session refresh failed {consecutive} times in a row")
}

pub fn run_finished(report: &RunReport, remaining: usize) -> String {
    format!(
        "Run finished: {} registered, {} left, {} attempts in {:.1}s",
        report.successes, remaining, report.attempts, report.elapsed_seconds
    )
}

pub fn run_failed(detail: &str) -> String {
    format!("Run stopped: {detail}")
}
