// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::clock::SystemClock;
use crate::test_support::{CountingBackend, ManualClock, RecordingAlerts, ScriptedProbe};

struct Rig {
    guardian: Arc<SessionGuardian>,
    backend: Arc<CountingBackend>,
    probe: Arc<ScriptedProbe>,
    alerts: Arc<RecordingAlerts>,
    stats: Arc<RunStats>,
}

fn rig(clock: Arc<dyn Clock>, backend: CountingBackend, probe_valid: bool, config: GuardianConfig) -> Rig {
    let backend = Arc::new(backend);
    let probe = Arc::new(ScriptedProbe::new(probe_valid));
    let alerts = Arc::new(RecordingAlerts::default());
    let stats = Arc::new(RunStats::new());
    let guardian = SessionGuardian::new(
        config,
        clock,
        Arc::clone(&backend) as Arc<dyn CredentialBackend>,
        Arc::clone(&probe) as Arc<dyn SessionProbe>,
        Arc::clone(&alerts) as Arc<dyn AlertSink>,
        Arc::clone(&stats),
    );
    Rig { guardian, backend, probe, alerts, stats }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn concurrent_logins_share_one_backend_call() {
    let r = rig(
        ManualClock::new(),
        CountingBackend::new().with_delay(Duration::from_millis(200)),
        true,
        GuardianConfig::default(),
    );

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let guardian = Arc::clone(&r.guardian);
            tokio::spawn(async move { guardian.login().await })
        })
        .collect();

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(r.backend.calls(), 1);
    assert!(tokens.iter().all(|t| *t == tokens[0]));
    assert_eq!(r.guardian.validity(), Validity::Valid);
}

#[tokio::test(start_paused = true)]
async fn sequential_logins_each_call_backend() {
    let r = rig(ManualClock::new(), CountingBackend::new(), true, GuardianConfig::default());

    let first = r.guardian.login().await.unwrap();
    let second = r.guardian.login().await.unwrap();

    assert_eq!(r.backend.calls(), 2);
    assert_ne!(first, second);
    assert_eq!(r.guardian.snapshot().tokens, Some(second));
}

#[tokio::test]
async fn login_retries_once_then_fails() {
    let r = rig(ManualClock::new(), CountingBackend::new().failing(5), true, GuardianConfig::default());

    let err = r.guardian.login().await.unwrap_err();

    assert_eq!(r.backend.calls(), 2);
    assert!(err.message.contains("call 2"), "{err}");
    assert_eq!(r.guardian.validity(), Validity::Unknown);
    assert!(r.guardian.snapshot().tokens.is_none());
}

#[tokio::test]
async fn login_recovers_on_retry() {
    let r = rig(ManualClock::new(), CountingBackend::new().failing(1), true, GuardianConfig::default());

    let tokens = r.guardian.login().await.unwrap();

    assert_eq!(r.backend.calls(), 2);
    assert_eq!(tokens.primary, "session-2");
}

#[tokio::test]
async fn login_after_invalid_counts_a_refresh() {
    let r = rig(ManualClock::new(), CountingBackend::new(), true, GuardianConfig::default());

    r.guardian.login().await.unwrap();
    assert_eq!(r.stats.session_refreshes(), 0);

    r.guardian.invalidate(RefreshReason::SessionExpired);
    assert_eq!(r.guardian.validity(), Validity::Invalid);
    r.guardian.login().await.unwrap();

    assert_eq!(r.stats.session_refreshes(), 1);
    assert_eq!(r.guardian.validity(), Validity::Valid);
}

#[tokio::test]
async fn check_is_rate_limited() {
    let clock = ManualClock::new();
    let r = rig(clock.clone(), CountingBackend::new(), true, GuardianConfig::default());
    r.guardian.login().await.unwrap();

    // Login counts as a check.
    assert!(r.guardian.check().await);
    assert_eq!(r.probe.calls(), 0);

    clock.advance(Duration::from_millis(1_000));
    assert!(r.guardian.check().await);
    assert_eq!(r.probe.calls(), 1);

    clock.advance(Duration::from_millis(400));
    r.probe.set_valid(false);
    assert!(r.guardian.check().await);
    assert_eq!(r.probe.calls(), 1);

    clock.advance(Duration::from_millis(600));
    assert!(!r.guardian.check().await);
    assert_eq!(r.probe.calls(), 2);
    assert_eq!(r.guardian.validity(), Validity::Invalid);
}

#[tokio::test]
async fn check_without_tokens_fails_without_probing() {
    let r = rig(ManualClock::new(), CountingBackend::new(), true, GuardianConfig::default());
    assert!(!r.guardian.check().await);
    assert_eq!(r.probe.calls(), 0);
}

#[tokio::test]
async fn probe_error_leaves_validity_alone() {
    let clock = ManualClock::new();
    let r = rig(clock.clone(), CountingBackend::new(), true, GuardianConfig::default());
    r.guardian.login().await.unwrap();
    r.probe.set_broken(true);
    clock.advance(Duration::from_secs(2));

    assert!(!r.guardian.check().await);
    assert_eq!(r.guardian.validity(), Validity::Valid);
}

#[tokio::test]
async fn signal_wakes_refresh_loop() {
    let config = GuardianConfig { refresh_period: Duration::from_secs(3600), ..GuardianConfig::default() };
    let r = rig(Arc::new(SystemClock), CountingBackend::new(), false, config);
    let cancel = CancellationToken::new();
    let handle = r.guardian.spawn_refresh_loop(cancel.clone());

    r.guardian.invalidate(RefreshReason::AuthFailure);
    r.guardian.signal_refresh(RefreshReason::AuthFailure);

    let guardian = Arc::clone(&r.guardian);
    wait_for(move || guardian.is_valid()).await;
    assert_eq!(r.backend.calls(), 1);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn signals_coalesce_while_pending() {
    let r = rig(ManualClock::new(), CountingBackend::new(), true, GuardianConfig::default());
    for _ in 0..5 {
        r.guardian.signal_refresh(RefreshReason::SessionInvalid);
    }
    assert_eq!(r.guardian.refresh_signals(), 5);
}

#[tokio::test(start_paused = true)]
async fn zero_refresh_period_still_runs_the_loop() {
    let config = GuardianConfig { refresh_period: Duration::ZERO, ..GuardianConfig::default() };
    let r = rig(ManualClock::new(), CountingBackend::new(), true, config);
    let cancel = CancellationToken::new();
    let handle = r.guardian.spawn_refresh_loop(cancel.clone());

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!handle.is_finished());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn refresh_loop_starts_only_once() {
    let r = rig(ManualClock::new(), CountingBackend::new(), true, GuardianConfig::default());
    let cancel = CancellationToken::new();
    let first = r.guardian.spawn_refresh_loop(cancel.clone());
    let second = r.guardian.spawn_refresh_loop(cancel.clone());

    second.await.unwrap();
    assert!(!first.is_finished());
    cancel.cancel();
    first.await.unwrap();
}

#[tokio::test]
async fn repeated_refresh_failures_alert_once() {
    let config = GuardianConfig { alert_after: 3, ..GuardianConfig::default() };
    let r = rig(ManualClock::new(), CountingBackend::new().failing(100), false, config);

    for _ in 0..5 {
        assert!(!r.guardian.revalidate(RefreshReason::Periodic).await);
    }

    let alerts = r.alerts.messages();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].0.contains("3 times"));
    assert_eq!(r.backend.calls(), 10);
}
