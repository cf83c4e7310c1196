// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owner of the session token. Single-flight login, rate-limited checks and
//! a background revalidation loop driven by refresh signals and a timer.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{RefreshReason, SessionProbe, SessionToken, TokenPair, Validity};
use crate::alert::{self, AlertPriority, AlertSink};
use crate::clock::{elapsed_since, Clock};
use crate::credential::CredentialBackend;
use crate::error::AuthError;
use crate::stats::RunStats;

/// One call plus one immediate retry.
const LOGIN_ATTEMPTS: u32 = 2;
/// Floor for the revalidation timer; a zero period is not a valid interval.
const MIN_REFRESH_PERIOD: Duration = Duration::from_millis(1);

type SharedLogin = Shared<BoxFuture<'static, Result<TokenPair, AuthError>>>;

#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Minimum spacing between remote probes in `check()`.
    pub check_interval: Duration,
    /// Period of the background revalidation timer.
    pub refresh_period: Duration,
    /// Consecutive failed background refreshes before alerting the operator.
    pub alert_after: u32,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            refresh_period: Duration::from_secs(30),
            alert_after: 3,
        }
    }
}

pub struct SessionGuardian {
    config: GuardianConfig,
    clock: Arc<dyn Clock>,
    backend: Arc<dyn CredentialBackend>,
    probe: Arc<dyn SessionProbe>,
    alerts: Arc<dyn AlertSink>,
    stats: Arc<RunStats>,
    state_tx: watch::Sender<SessionToken>,
    refresh_tx: mpsc::Sender<RefreshReason>,
    refresh_rx: Mutex<Option<mpsc::Receiver<RefreshReason>>>,
    inflight: Mutex<Option<SharedLogin>>,
    refresh_signals: AtomicU64,
    failed_refreshes: AtomicU32,
}

impl SessionGuardian {
    pub fn new(
        config: GuardianConfig,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn CredentialBackend>,
        probe: Arc<dyn SessionProbe>,
        alerts: Arc<dyn AlertSink>,
        stats: Arc<RunStats>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionToken::default());
        // Capacity 1: a queued request already covers any later one.
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        Arc::new(Self {
            config,
            clock,
            backend,
            probe,
            alerts,
            stats,
            state_tx,
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            inflight: Mutex::new(None),
            refresh_signals: AtomicU64::new(0),
            failed_refreshes: AtomicU32::new(0),
        })
    }

    pub fn snapshot(&self) -> SessionToken {
        self.state_tx.borrow().clone()
    }

    pub fn validity(&self) -> Validity {
        self.state_tx.borrow().validity
    }

    pub fn is_valid(&self) -> bool {
        self.validity() == Validity::Valid
    }

    /// Number of refresh signals raised so far (coalesced ones included).
    pub fn refresh_signals(&self) -> u64 {
        self.refresh_signals.load(Ordering::Relaxed)
    }

    /// Acquire a fresh token pair and publish it.
    ///
    /// At most one backend login runs at a time: concurrent callers share the
    /// in-flight attempt and all receive its result.
    pub async fn login(self: &Arc<Self>) -> Result<TokenPair, AuthError> {
        let login = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let this = Arc::clone(self);
                    let pending = async move { this.acquire_and_publish().await }.boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = login.clone().await;

        let mut slot = self.inflight.lock();
        if slot.as_ref().is_some_and(|pending| pending.ptr_eq(&login)) {
            *slot = None;
        }
        result
    }

    async fn acquire_and_publish(&self) -> Result<TokenPair, AuthError> {
        let mut last_err = AuthError::new("no login attempt made");
        for attempt in 1..=LOGIN_ATTEMPTS {
            let result = self.backend.acquire_tokens().await.and_then(|tokens| {
                if tokens.is_complete() {
                    Ok(tokens)
                } else {
                    Err(AuthError::new("backend returned an incomplete token pair"))
                }
            });
            match result {
                Ok(tokens) => {
                    self.publish_login(tokens.clone());
                    return Ok(tokens);
                }
                Err(e) => {
                    tracing::warn!(attempt, backend = self.backend.name(), err = %e, "login attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn publish_login(&self, tokens: TokenPair) {
        let now = self.clock.now();
        let mut previous = Validity::Unknown;
        self.state_tx.send_modify(|state| {
            previous = state.validity;
            *state = SessionToken {
                tokens: Some(tokens),
                validity: Validity::Valid,
                last_refresh_at: Some(now),
                last_check_at: Some(now),
            };
        });
        if previous == Validity::Invalid {
            self.stats.record_session_refresh();
        }
        tracing::info!(backend = self.backend.name(), previous = %previous, "session login succeeded");
    }

    /// Confirm the current token still authorizes requests.
    ///
    /// Within `check_interval` of the last probe the answer comes from the
    /// current snapshot. A probe error counts as a failed check and leaves
    /// validity untouched.
    pub async fn check(&self) -> bool {
        let snapshot = self.snapshot();
        let now = self.clock.now();
        if let Some(last) = snapshot.last_check_at {
            if elapsed_since(last, now) < self.config.check_interval {
                return snapshot.is_valid();
            }
        }
        let Some(tokens) = snapshot.tokens else {
            return false;
        };

        match self.probe.probe(&tokens).await {
            Ok(valid) => {
                let checked_at = self.clock.now();
                let validity = if valid { Validity::Valid } else { Validity::Invalid };
                // A login may have replaced the pair while the probe ran.
                self.state_tx.send_if_modified(|state| {
                    if state.tokens.as_ref() != Some(&tokens) {
                        return false;
                    }
                    state.validity = validity;
                    state.last_check_at = Some(checked_at);
                    true
                });
                tracing::debug!(%validity, "session check complete");
                valid
            }
            Err(e) => {
                let err = format!("{e:#}");
                tracing::warn!(%err, "session probe failed");
                false
            }
        }
    }

    /// Mark the session invalid immediately.
    pub fn invalidate(&self, reason: RefreshReason) {
        let changed = self.state_tx.send_if_modified(|state| {
            if state.validity == Validity::Invalid {
                return false;
            }
            state.validity = Validity::Invalid;
            true
        });
        if changed {
            tracing::warn!(%reason, "session invalidated");
        }
    }

    /// Ask the background loop to revalidate. Never blocks; a request that is
    /// already queued absorbs this one.
    pub fn signal_refresh(&self, reason: RefreshReason) {
        self.refresh_signals.fetch_add(1, Ordering::Relaxed);
        match self.refresh_tx.try_send(reason) {
            Ok(()) => tracing::debug!(%reason, "refresh signalled"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(%reason, "refresh already pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(%reason, "refresh loop gone, signal dropped");
            }
        }
    }

    /// Run `check()`, falling back to `login()`. Returns whether the session
    /// ended up valid.
    pub async fn revalidate(self: &Arc<Self>, reason: RefreshReason) -> bool {
        tracing::debug!(%reason, "revalidating session");
        if self.check().await {
            self.failed_refreshes.store(0, Ordering::Relaxed);
            return true;
        }
        match self.login().await {
            Ok(_) => {
                self.failed_refreshes.store(0, Ordering::Relaxed);
                true
            }
            Err(e) => {
                let failures = self.failed_refreshes.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(%reason, failures, err = %e, "session refresh failed");
                if failures == self.config.alert_after {
                    self.alerts.notify(alert::refresh_failing(failures), AlertPriority::High);
                }
                false
            }
        }
    }

    /// Spawn the background revalidation loop. It wakes on a refresh signal
    /// or the periodic timer, whichever comes first, and exits on `cancel`.
    pub fn spawn_refresh_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let receiver = self.refresh_rx.lock().take();
        let guardian = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut rx) = receiver else {
                tracing::warn!("session refresh loop already started");
                return;
            };
            let period = guardian.config.refresh_period.max(MIN_REFRESH_PERIOD);
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;

            loop {
                let reason = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(reason) => reason,
                        None => break,
                    },
                    _ = timer.tick() => RefreshReason::Periodic,
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = guardian.revalidate(reason) => {}
                }
            }
            tracing::debug!("session refresh loop stopped");
        })
    }
}

#[cfg(test)]
#[path = "guardian_tests.rs"]
mod tests;
