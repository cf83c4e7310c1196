// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run counters and the terminal report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Append-only counters for one run. Shared across tasks, so every field is
/// either atomic or behind its own lock.
#[derive(Debug)]
pub struct RunStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    session_refreshes: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
    /// Set when the target is reached; the pre-deadline wait is not counted.
    started_at: Mutex<Option<Instant>>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            session_refreshes: AtomicU64::new(0),
            latencies: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    /// Start the run clock. Later calls keep the first start.
    pub fn start_clock(&self) {
        self.started_at.lock().get_or_insert_with(Instant::now);
    }

    /// Count a scheduler cycle. Returns the new attempt number (1-based).
    pub fn record_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_success(&self) -> u64 {
        self.successes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_refresh(&self) {
        self.session_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency: Duration) {
        self.latencies.lock().push(latency);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn session_refreshes(&self) -> u64 {
        self.session_refreshes.load(Ordering::Relaxed)
    }

    /// Time since [`start_clock`](Self::start_clock), zero before it.
    pub fn elapsed(&self) -> Duration {
        self.started_at.lock().map(|at| at.elapsed()).unwrap_or_default()
    }

    pub fn report(&self) -> RunReport {
        let avg_latency_ms = {
            let latencies = self.latencies.lock();
            if latencies.is_empty() {
                0.0
            } else {
                let total: Duration = latencies.iter().sum();
                total.as_secs_f64() * 1000.0 / latencies.len() as f64
            }
        };
        RunReport {
            attempts: self.attempts(),
            successes: self.successes(),
            failures: self.failures(),
            session_refreshes: self.session_refreshes(),
            elapsed_seconds: self.elapsed().as_secs_f64(),
            avg_latency_ms,
        }
    }
}

/// Structured summary emitted when a run reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub session_refreshes: u64,
    pub elapsed_seconds: f64,
    pub avg_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_averages_latencies() {
        let stats = RunStats::new();
        stats.record_latency(Duration::from_millis(10));
        stats.record_latency(Duration::from_millis(30));
        assert_eq!(stats.record_attempt(), 1);
        assert_eq!(stats.record_attempt(), 2);
        stats.record_success();
        stats.record_failure();
        stats.record_session_refresh();

        let report = stats.report();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.successes, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.session_refreshes, 1);
        assert!((report.avg_latency_ms - 20.0).abs() < 1e-6);
    }

    #[test]
    fn clock_starts_on_demand() {
        let stats = RunStats::new();
        assert_eq!(stats.elapsed(), Duration::ZERO);

        stats.start_clock();
        std::thread::sleep(Duration::from_millis(5));
        let first = stats.elapsed();
        assert!(first >= Duration::from_millis(5));

        stats.start_clock();
        assert!(stats.elapsed() >= first);
    }

    #[test]
    fn report_without_latencies_is_zero() {
        let report = RunStats::new().report();
        assert_eq!(report.avg_latency_ms, 0.0);
        assert_eq!(report.attempts, 0);
    }

    #[test]
    fn report_serializes_snake_case() -> anyhow::Result<()> {
        let json = serde_json::to_value(RunStats::new().report())?;
        assert!(json.get("session_refreshes").is_some());
        assert!(json.get("avg_latency_ms").is_some());
        assert!(json.get("elapsed_seconds").is_some());
        Ok(())
    }
}
