// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod alert;
pub mod classify;
pub mod clock;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod test_support;
pub mod workset;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alert::{AlertPriority, AlertSink, LogAlerts, NtfyAlerts};
use crate::clock::{Clock, SystemClock};
use crate::config::{RushConfig, Settings};
use crate::context::RunContext;
use crate::coordinator::{Coordinator, PrepHook};
use crate::credential::{CommandCredentials, CredentialBackend, StaticCredentials};
use crate::dispatch::http::{Endpoint, HttpProbe, HttpTransport};
use crate::dispatch::Dispatcher;
use crate::error::{AuthError, RunOutcome};
use crate::scheduler::CycleScheduler;
use crate::session::{RefreshReason, TokenPair};
use crate::stats::RunReport;
use crate::workset::{WorkItem, WorkSet};

/// Final state of a run, printed as JSON by the binary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub report: RunReport,
    pub remaining: Vec<WorkItem>,
}

/// Wire up the production collaborators from `config` and execute the run.
pub async fn run(config: RushConfig, shutdown: CancellationToken) -> anyhow::Result<RunSummary> {
    let settings = Settings::from_config(&config, &chrono::Local::now())?;
    let endpoint = Endpoint::parse(&settings.base_url)?;

    let alerts: Arc<dyn AlertSink> = match config.ntfy_topic {
        Some(ref topic) => Arc::new(NtfyAlerts::new(topic)?),
        None => Arc::new(LogAlerts),
    };
    let backend: Arc<dyn CredentialBackend> = match (&config.login_command, &config.session_id, &config.monitor_id)
    {
        (Some(command), _, _) => {
            Arc::new(CommandCredentials::new(command, Duration::from_millis(config.login_timeout_ms)))
        }
        (None, Some(primary), Some(secondary)) => {
            Arc::new(StaticCredentials::new(TokenPair::new(primary, secondary)))
        }
        _ => anyhow::bail!("no credential source configured"),
    };
    let probe = Arc::new(HttpProbe::new(endpoint.clone())?);
    let transport = Arc::new(HttpTransport::new(endpoint, settings.concurrency)?);

    info!(
        target_at = %settings.target,
        items = settings.items.len(),
        concurrency = settings.concurrency,
        backend = backend.name(),
        "run configured"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ctx = RunContext::new(settings, clock, backend, probe, alerts, shutdown);
    let dispatcher = Arc::new(Dispatcher::new(&ctx, transport));
    execute(ctx, dispatcher).await
}

/// Drive one run on an assembled context: prepare before the target, wait
/// for it, then cycle until the work set is empty, a fatal outcome, or
/// cancellation.
pub async fn execute(ctx: RunContext, dispatcher: Arc<Dispatcher>) -> anyhow::Result<RunSummary> {
    let settings = Arc::clone(&ctx.settings);
    let mut work = settings.work_set();
    ctx.alerts.notify(alert::run_started(&work), AlertPriority::Default);

    let coordinator = Coordinator::new(Arc::clone(&ctx.clock));
    let hooks = preparation_hooks(&ctx, &dispatcher, &work);
    let prepared = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => None,
        result = coordinator.prepare(settings.target, hooks) => Some(result),
    };

    let outcome = match prepared {
        None => RunOutcome::Cancelled,
        Some(Err(e)) => match e.downcast_ref::<AuthError>() {
            Some(auth) => {
                let err = format!("{e:#}");
                error!(%err, "login failed before target");
                RunOutcome::from(auth.clone())
            }
            None => return Err(e),
        },
        Some(Ok(())) => run_from_target(&ctx, &coordinator, dispatcher, &mut work).await,
    };

    let report = ctx.stats.report();
    match outcome {
        RunOutcome::Fatal { ref detail, .. } => {
            ctx.alerts.notify(alert::run_failed(detail), AlertPriority::Urgent);
        }
        _ => ctx.alerts.notify(alert::run_finished(&report, work.len()), AlertPriority::High),
    }
    info!(
        outcome = outcome.as_str(),
        attempts = report.attempts,
        successes = report.successes,
        failures = report.failures,
        session_refreshes = report.session_refreshes,
        elapsed_seconds = report.elapsed_seconds,
        avg_latency_ms = report.avg_latency_ms,
        remaining = work.len(),
        "run finished"
    );

    Ok(RunSummary { outcome, report, remaining: work.iter().cloned().collect() })
}

async fn run_from_target(
    ctx: &RunContext,
    coordinator: &Coordinator,
    dispatcher: Arc<Dispatcher>,
    work: &mut WorkSet,
) -> RunOutcome {
    let refresh_cancel = ctx.shutdown.child_token();
    let refresh_loop = ctx.session.spawn_refresh_loop(refresh_cancel.clone());

    let reached = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => false,
        _ = coordinator.wait_until(ctx.settings.target) => true,
    };
    let outcome = if reached {
        ctx.stats.start_clock();
        CycleScheduler::new(ctx.clone(), dispatcher).run(work).await
    } else {
        RunOutcome::Cancelled
    };

    refresh_cancel.cancel();
    if let Err(e) = refresh_loop.await {
        warn!(err = %e, "session refresh loop ended abnormally");
    }
    outcome
}

/// Login at `login_offset`, then a final session check plus payload
/// precompute at `final_check_offset`.
fn preparation_hooks(ctx: &RunContext, dispatcher: &Arc<Dispatcher>, work: &WorkSet) -> Vec<PrepHook> {
    let settings = &ctx.settings;

    let session = Arc::clone(&ctx.session);
    let login = PrepHook::new("login", settings.login_offset, move || async move {
        session.login().await?;
        Ok::<(), anyhow::Error>(())
    });

    let session = Arc::clone(&ctx.session);
    let dispatcher = Arc::clone(dispatcher);
    let items: Vec<WorkItem> = work.iter().cloned().collect();
    let final_check = PrepHook::new("final-check", settings.final_check_offset, move || async move {
        if !session.check().await {
            warn!("session failed final check, logging in again");
            session.invalidate(RefreshReason::SessionInvalid);
            session.login().await?;
        }
        dispatcher.warm(&items);
        Ok::<(), anyhow::Error>(())
    });

    vec![login, final_check]
}
