// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::alert::AlertSink;
use crate::clock::Clock;
use crate::config::Settings;
use crate::credential::CredentialBackend;
use crate::health::HealthMonitor;
use crate::session::{SessionGuardian, SessionProbe};
use crate::stats::RunStats;

/// Everything a run shares, built once and handed to each component.
#[derive(Clone)]
pub struct RunContext {
    pub settings: Arc<Settings>,
    pub clock: Arc<dyn Clock>,
    pub session: Arc<SessionGuardian>,
    pub health: Arc<HealthMonitor>,
    pub stats: Arc<RunStats>,
    pub alerts: Arc<dyn AlertSink>,
    pub shutdown: CancellationToken,
}

impl RunContext {
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn CredentialBackend>,
        probe: Arc<dyn SessionProbe>,
        alerts: Arc<dyn AlertSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let stats = Arc::new(RunStats::new());
        let health = Arc::new(HealthMonitor::new(settings.peak_window()));
        let session = SessionGuardian::new(
            settings.guardian.clone(),
            Arc::clone(&clock),
            backend,
            probe,
            Arc::clone(&alerts),
            Arc::clone(&stats),
        );
        Self { settings: Arc::new(settings), clock, session, health, stats, alerts, shutdown }
    }
}
