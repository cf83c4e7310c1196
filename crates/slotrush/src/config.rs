// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use clap::Parser;
use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dispatch::http::Endpoint;
use crate::dispatch::payload::DEFAULT_CAMPUS;
use crate::health::PeakWindow;
use crate::session::GuardianConfig;
use crate::workset::{WorkItem, WorkSet};

pub const DEFAULT_BASE_URL: &str = "https://sugang.smu.ac.kr";

/// Enrollment rush engine: waits for the registration instant, then keeps
/// submitting requests until every item is acquired.
#[derive(Debug, Clone, Parser)]
#[command(name = "slotrush", version, about)]
pub struct RushConfig {
    /// Target instant: RFC 3339, or HH:MM[:SS[.fff]] local time today.
    #[arg(long, env = "SLOTRUSH_TARGET")]
    pub target: Option<String>,

    /// Work item as RESOURCE:SECTION (repeatable).
    #[arg(long = "item", value_name = "RESOURCE:SECTION", value_parser = parse_item)]
    pub items: Vec<WorkItem>,

    /// Resource ids to send first, comma separated.
    #[arg(long, env = "SLOTRUSH_PRIORITY", value_delimiter = ',')]
    pub priority: Vec<String>,

    /// JSON workload file with items, priority and pacing overrides.
    #[arg(long, env = "SLOTRUSH_WORKLOAD")]
    pub workload: Option<PathBuf>,

    /// Base URL of the registration site.
    #[arg(long, env = "SLOTRUSH_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Campus code sent with every request.
    #[arg(long, env = "SLOTRUSH_CAMPUS_CODE", default_value = DEFAULT_CAMPUS)]
    pub campus_code: String,

    /// Maximum concurrent steady-phase requests.
    #[arg(long, env = "SLOTRUSH_CONCURRENCY", default_value_t = 10)]
    pub concurrency: usize,

    /// Verbose logging.
    #[arg(long, env = "SLOTRUSH_DEBUG")]
    pub debug: bool,

    /// Log format (json or text).
    #[arg(long, env = "SLOTRUSH_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Per-request timeout for the opening burst, in ms.
    #[arg(long, env = "SLOTRUSH_FIRST_TIMEOUT_MS", default_value_t = 1_000)]
    pub first_timeout_ms: u64,

    /// Per-request timeout after the opening burst, in ms.
    #[arg(long, env = "SLOTRUSH_STEADY_TIMEOUT_MS", default_value_t = 2_000)]
    pub steady_timeout_ms: u64,

    /// How long before the target to log in, in ms.
    #[arg(long, env = "SLOTRUSH_LOGIN_OFFSET_MS", default_value_t = 15_000)]
    pub login_offset_ms: u64,

    /// How long before the target to run the final session check, in ms.
    #[arg(long, env = "SLOTRUSH_FINAL_CHECK_OFFSET_MS", default_value_t = 5_000)]
    pub final_check_offset_ms: u64,

    /// Minimum spacing between session probes, in ms.
    #[arg(long, env = "SLOTRUSH_CHECK_INTERVAL_MS", default_value_t = 1_000)]
    pub check_interval_ms: u64,

    /// Background session revalidation period, in ms.
    #[arg(long, env = "SLOTRUSH_REFRESH_PERIOD_MS", default_value_t = 30_000)]
    pub refresh_period_ms: u64,

    /// Consecutive failed refreshes before alerting.
    #[arg(long, env = "SLOTRUSH_REFRESH_ALERT_AFTER", default_value_t = 3)]
    pub refresh_alert_after: u32,

    /// Start of the peak-load window before the target, in ms.
    #[arg(long, env = "SLOTRUSH_PEAK_BEFORE_MS", default_value_t = 5_000)]
    pub peak_before_ms: u64,

    /// End of the peak-load window after the target, in ms.
    #[arg(long, env = "SLOTRUSH_PEAK_AFTER_MS", default_value_t = 30_000)]
    pub peak_after_ms: u64,

    /// Alert when an item is reported full.
    #[arg(long, env = "SLOTRUSH_ALERT_ON_FULL")]
    pub alert_on_full: bool,

    /// ntfy topic for push alerts. Alerts are only logged when unset.
    #[arg(long, env = "SLOTRUSH_NTFY_TOPIC")]
    pub ntfy_topic: Option<String>,

    /// Shell command that logs in and prints the session tokens.
    #[arg(long, env = "SLOTRUSH_LOGIN_COMMAND")]
    pub login_command: Option<String>,

    /// Timeout for the login command, in ms.
    #[arg(long, env = "SLOTRUSH_LOGIN_TIMEOUT_MS", default_value_t = 60_000)]
    pub login_timeout_ms: u64,

    /// Fixed SGJSESSIONID, used when no login command is set.
    #[arg(long, env = "SLOTRUSH_SESSION_ID")]
    pub session_id: Option<String>,

    /// Fixed WMONID, used when no login command is set.
    #[arg(long, env = "SLOTRUSH_MONITOR_ID")]
    pub monitor_id: Option<String>,
}

/// Parse a `RESOURCE:SECTION` item argument.
pub fn parse_item(s: &str) -> Result<WorkItem, String> {
    let Some((resource, section)) = s.split_once(':') else {
        return Err(format!("expected RESOURCE:SECTION, got {s:?}"));
    };
    let (resource, section) = (resource.trim(), section.trim());
    if resource.is_empty() || section.is_empty() {
        return Err(format!("empty resource or section in {s:?}"));
    }
    Ok(WorkItem::new(resource, section))
}

/// Resolve a target instant. RFC 3339 is taken as is; a bare clock time is
/// placed on `now`'s date in `now`'s timezone.
pub fn parse_target<Tz: TimeZone>(s: &str, now: &DateTime<Tz>) -> anyhow::Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(instant.with_timezone(&Utc));
    }
    let Some(time) = ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
    else {
        anyhow::bail!("invalid target {s:?}: expected RFC 3339 or HH:MM[:SS[.fff]]");
    };
    let naive = now.date_naive().and_time(time);
    let Some(local) = now.timezone().from_local_datetime(&naive).earliest() else {
        anyhow::bail!("target {s:?} does not exist in local time today");
    };
    Ok(local.with_timezone(&Utc))
}

impl RushConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let Some(ref target) = self.target else {
            anyhow::bail!("--target is required");
        };
        parse_target(target, &chrono::Local::now())?;

        if self.items.is_empty() && self.workload.is_none() {
            anyhow::bail!("no work items: pass --item or --workload");
        }
        if self.concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }
        if self.first_timeout_ms == 0 || self.steady_timeout_ms == 0 {
            anyhow::bail!("request timeouts must be positive");
        }
        if self.refresh_period_ms == 0 {
            anyhow::bail!("--refresh-period-ms must be positive");
        }
        if self.final_check_offset_ms > self.login_offset_ms {
            anyhow::bail!("--final-check-offset-ms must not exceed --login-offset-ms");
        }
        Endpoint::parse(&self.base_url)?;

        if self.login_command.is_none() && (self.session_id.is_none() || self.monitor_id.is_none()) {
            anyhow::bail!("either --login-command or both --session-id and --monitor-id must be set");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }
}

/// Section value as written in a workload file: `"CSE101": 1` or `"CSE101": "01"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionValue {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for SectionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Contents of the `--workload` JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Workload {
    pub items: IndexMap<String, SectionValue>,
    pub priority: Vec<String>,
    pub pacing: Pacing,
}

impl Workload {
    pub fn work_items(&self) -> impl Iterator<Item = WorkItem> + '_ {
        self.items.iter().map(|(id, section)| WorkItem::new(id.clone(), section.to_string()))
    }
}

pub fn load_workload(path: &Path) -> anyhow::Result<Workload> {
    let contents = std::fs::read_to_string(path)?;
    let workload: Workload = serde_json::from_str(&contents)?;
    Ok(workload)
}

/// Uniform delay range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayBand {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayBand {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

/// Request pacing. Every wait the scheduler and dispatcher make comes from
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    /// Spacing between items in the opening burst.
    pub first_interval_ms: u64,
    /// Symmetric jitter applied to `first_interval_ms`.
    pub first_jitter_ms: u64,
    pub early: DelayBand,
    pub mid: DelayBand,
    pub late: DelayBand,
    /// Last attempt number that uses the early band.
    pub early_until_attempt: u64,
    /// Last attempt number that uses the mid band.
    pub mid_until_attempt: u64,
    /// Window after the target where cycles follow `post_deadline`.
    pub post_deadline_window_ms: u64,
    pub post_deadline: DelayBand,
    pub peak_item_limit: usize,
    pub peak_item_delay_ms: u64,
    pub invalid_session_pause_ms: u64,
    /// Pause before the re-send after a first-phase failure.
    pub retry_pause_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            first_interval_ms: 50,
            first_jitter_ms: 10,
            early: DelayBand::new(500, 1_000),
            mid: DelayBand::new(1_000, 2_000),
            late: DelayBand::new(2_000, 3_000),
            early_until_attempt: 3,
            mid_until_attempt: 10,
            post_deadline_window_ms: 30_000,
            post_deadline: DelayBand::new(100, 300),
            peak_item_limit: 3,
            peak_item_delay_ms: 1_000,
            invalid_session_pause_ms: 200,
            retry_pause_ms: 50,
        }
    }
}

impl Pacing {
    /// No waits at all.
    pub fn zero() -> Self {
        let none = DelayBand::new(0, 0);
        Self {
            first_interval_ms: 0,
            first_jitter_ms: 0,
            early: none,
            mid: none,
            late: none,
            post_deadline: none,
            peak_item_delay_ms: 0,
            invalid_session_pause_ms: 0,
            retry_pause_ms: 0,
            ..Self::default()
        }
    }

    /// Opening-burst spacing with jitter applied.
    pub fn first_interval(&self) -> Duration {
        let base = self.first_interval_ms as i64;
        let jitter = self.first_jitter_ms as i64;
        let offset = if jitter > 0 { rand::rng().random_range(-jitter..=jitter) } else { 0 };
        Duration::from_millis((base + offset).max(0) as u64)
    }

    /// Band for the given attempt count, widening as the run goes on.
    pub fn band_for(&self, attempts: u64) -> DelayBand {
        if attempts <= self.early_until_attempt {
            self.early
        } else if attempts <= self.mid_until_attempt {
            self.mid
        } else {
            self.late
        }
    }

    /// Band for the wait between cycles. Shortened just after the target.
    pub fn cycle_band(&self, attempts: u64, since_target: Option<Duration>) -> DelayBand {
        match since_target {
            Some(elapsed) if elapsed <= Duration::from_millis(self.post_deadline_window_ms) => {
                self.post_deadline
            }
            _ => self.band_for(attempts),
        }
    }

    pub fn peak_item_delay(&self) -> Duration {
        Duration::from_millis(self.peak_item_delay_ms)
    }

    pub fn invalid_session_pause(&self) -> Duration {
        Duration::from_millis(self.invalid_session_pause_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

/// Frozen run configuration, shared by every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: DateTime<Utc>,
    pub items: Vec<WorkItem>,
    pub priority: Vec<String>,
    pub base_url: String,
    pub campus_code: String,
    pub concurrency: usize,
    pub first_timeout: Duration,
    pub steady_timeout: Duration,
    pub login_offset: Duration,
    pub final_check_offset: Duration,
    pub guardian: GuardianConfig,
    pub peak_before: Duration,
    pub peak_after: Duration,
    pub alert_on_full: bool,
    pub pacing: Pacing,
}

impl Settings {
    /// Defaults for a run aimed at `target`, with no items.
    pub fn for_target(target: DateTime<Utc>) -> Self {
        Self {
            target,
            items: Vec::new(),
            priority: Vec::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            campus_code: DEFAULT_CAMPUS.to_owned(),
            concurrency: 10,
            first_timeout: Duration::from_secs(1),
            steady_timeout: Duration::from_secs(2),
            login_offset: Duration::from_secs(15),
            final_check_offset: Duration::from_secs(5),
            guardian: GuardianConfig::default(),
            peak_before: Duration::from_secs(5),
            peak_after: Duration::from_secs(30),
            alert_on_full: false,
            pacing: Pacing::default(),
        }
    }

    /// Build settings from parsed flags plus the optional workload file.
    /// Flag items are added after workload items and replace their sections;
    /// a non-empty flag priority list replaces the workload's.
    pub fn from_config<Tz: TimeZone>(config: &RushConfig, now: &DateTime<Tz>) -> anyhow::Result<Self> {
        let Some(ref target) = config.target else {
            anyhow::bail!("--target is required");
        };
        let mut settings = Self::for_target(parse_target(target, now)?);

        let workload = match config.workload {
            Some(ref path) => load_workload(path)
                .with_context(|| format!("failed to load workload {}", path.display()))?,
            None => Workload::default(),
        };

        let mut work: WorkSet = workload.work_items().collect();
        for item in &config.items {
            work.insert(item.clone());
        }
        if work.is_empty() {
            anyhow::bail!("no work items configured");
        }
        settings.items = work.iter().cloned().collect();
        settings.priority =
            if config.priority.is_empty() { workload.priority } else { config.priority.clone() };
        settings.pacing = workload.pacing;

        settings.base_url = config.base_url.clone();
        settings.campus_code = config.campus_code.clone();
        settings.concurrency = config.concurrency.max(1);
        settings.first_timeout = Duration::from_millis(config.first_timeout_ms);
        settings.steady_timeout = Duration::from_millis(config.steady_timeout_ms);
        settings.login_offset = Duration::from_millis(config.login_offset_ms);
        settings.final_check_offset = Duration::from_millis(config.final_check_offset_ms);
        settings.guardian = GuardianConfig {
            check_interval: Duration::from_millis(config.check_interval_ms),
            refresh_period: Duration::from_millis(config.refresh_period_ms),
            alert_after: config.refresh_alert_after.max(1),
        };
        settings.peak_before = Duration::from_millis(config.peak_before_ms);
        settings.peak_after = Duration::from_millis(config.peak_after_ms);
        settings.alert_on_full = config.alert_on_full;
        Ok(settings)
    }

    pub fn work_set(&self) -> WorkSet {
        self.items.iter().cloned().collect()
    }

    pub fn peak_window(&self) -> PeakWindow {
        PeakWindow::around(self.target, self.peak_before, self.peak_after)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
