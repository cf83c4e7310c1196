// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a manual clock, scripted collaborators and a
//! run builder.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::alert::{AlertPriority, AlertSink};
use crate::clock::Clock;
use crate::config::{Pacing, Settings};
use crate::context::RunContext;
use crate::credential::CredentialBackend;
use crate::dispatch::http::{Transport, WireRequest};
use crate::dispatch::payload::form_value;
use crate::dispatch::Dispatcher;
use crate::error::{AuthError, TransportError, TransportErrorKind};
use crate::session::{SessionProbe, TokenPair};

/// Virtual clock. `sleep` advances time instantly and yields once; `spin`
/// advances by 100 µs.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        let start = Utc.with_ymd_and_hms(2026, 2, 23, 0, 59, 0).single().unwrap_or_default();
        Self::starting_at(start)
    }

    pub fn starting_at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(start), sleeps: Mutex::new(Vec::new()) })
    }

    pub fn advance(&self, by: Duration) {
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::zero());
        *self.now.lock() += by;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }

    fn spin(&self) {
        *self.now.lock() += TimeDelta::microseconds(100);
    }
}

/// A request seen by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub body: String,
    pub cookie: String,
    pub timeout: Duration,
}

impl RecordedRequest {
    pub fn resource_id(&self) -> Option<String> {
        form_value(&self.body, "@d1#strSbjNo")
    }
}

type Responder = Box<dyn Fn(&RecordedRequest) -> Result<String, TransportError> + Send + Sync>;

/// Transport that answers from a queue of scripted replies, falling back to
/// a responder once the queue is drained.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<String, TransportError>>>,
    fallback: Responder,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn responding<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&RecordedRequest) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request gets `body`.
    pub fn always(body: &str) -> Arc<Self> {
        let body = body.to_owned();
        Self::responding(move |_| Ok(body.clone()))
    }

    /// Replies in order, then `fallback` for everything after.
    pub fn sequence(replies: Vec<Result<String, TransportError>>, fallback: &str) -> Arc<Self> {
        let transport = Self::always(fallback);
        transport.queue.lock().extend(replies);
        transport
    }

    /// Replies keyed by resource id; unknown ids get `default`.
    pub fn per_item(replies: &[(&str, &str)], default: &str) -> Arc<Self> {
        let replies: Vec<(String, String)> =
            replies.iter().map(|(id, body)| ((*id).to_owned(), (*body).to_owned())).collect();
        let default = default.to_owned();
        Self::responding(move |req| {
            let id = req.resource_id().unwrap_or_default();
            let body = replies.iter().find(|(k, _)| *k == id).map(|(_, v)| v.clone());
            Ok(body.unwrap_or_else(|| default.clone()))
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Resource ids in send order.
    pub fn sent_ids(&self) -> Vec<String> {
        self.requests.lock().iter().filter_map(RecordedRequest::resource_id).collect()
    }
}

impl Transport for ScriptedTransport {
    fn post_form<'a>(
        &'a self,
        request: WireRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>> {
        let recorded = RecordedRequest {
            body: request.body.to_owned(),
            cookie: request.cookie.to_owned(),
            timeout: request.timeout,
        };
        self.requests.lock().push(recorded.clone());
        let queued = self.queue.lock().pop_front();
        let reply = queued.unwrap_or_else(|| (self.fallback)(&recorded));
        Box::pin(async move { reply })
    }
}

pub fn timeout_error() -> TransportError {
    TransportError::timeout("operation timed out after 1s")
}

pub fn generic_error(message: &str) -> TransportError {
    TransportError::new(TransportErrorKind::Other, message)
}

/// Credential backend that counts calls. Each successful call returns a
/// distinct primary token (`session-<n>`).
pub struct CountingBackend {
    delay: Duration,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl Default for CountingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingBackend {
    pub fn new() -> Self {
        Self { delay: Duration::ZERO, failures_left: AtomicU32::new(0), calls: AtomicU32::new(0) }
    }

    /// Each call takes `delay` of tokio time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `n` calls fail.
    pub fn failing(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::Relaxed);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl CredentialBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn acquire_tokens(&self) -> Pin<Box<dyn Future<Output = Result<TokenPair, AuthError>> + Send + '_>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let failing = self
                .failures_left
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AuthError::new(format!("backend refused call {n}")));
            }
            Ok(TokenPair::new(format!("session-{n}"), "monitor"))
        })
    }
}

/// Probe with a settable answer.
pub struct ScriptedProbe {
    valid: AtomicBool,
    broken: AtomicBool,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(valid: bool) -> Self {
        Self { valid: AtomicBool::new(valid), broken: AtomicBool::new(false), calls: AtomicU32::new(0) }
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Relaxed);
    }

    /// Make every probe return an error.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl SessionProbe for ScriptedProbe {
    fn probe<'a>(
        &'a self,
        _tokens: &'a TokenPair,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.broken.load(Ordering::Relaxed) {
                anyhow::bail!("probe connection refused");
            }
            Ok(self.valid.load(Ordering::Relaxed))
        })
    }
}

/// Alert sink that keeps every message.
#[derive(Default)]
pub struct RecordingAlerts {
    messages: Mutex<Vec<(String, AlertPriority)>>,
}

impl RecordingAlerts {
    pub fn messages(&self) -> Vec<(String, AlertPriority)> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|(m, _)| m.contains(needle))
    }
}

impl AlertSink for RecordingAlerts {
    fn notify(&self, message: String, priority: AlertPriority) {
        self.messages.lock().push((message, priority));
    }
}

/// A fully wired run on a [`ManualClock`].
pub struct TestRun {
    pub clock: Arc<ManualClock>,
    pub backend: Arc<CountingBackend>,
    pub probe: Arc<ScriptedProbe>,
    pub alerts: Arc<RecordingAlerts>,
    pub transport: Arc<ScriptedTransport>,
    pub ctx: RunContext,
    pub dispatcher: Arc<Dispatcher>,
}

/// Builder for [`TestRun`]. Defaults: target equal to the clock's start,
/// zero pacing, a healthy backend and probe, and a transport answering
/// `"true"`.
pub struct TestRunBuilder {
    clock: Arc<ManualClock>,
    settings: Settings,
    backend: CountingBackend,
    probe_valid: bool,
    transport: Option<Arc<ScriptedTransport>>,
}

impl Default for TestRunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunBuilder {
    pub fn new() -> Self {
        let clock = ManualClock::new();
        let mut settings = Settings::for_target(clock.now());
        settings.pacing = Pacing::zero();
        Self { clock, settings, backend: CountingBackend::new(), probe_valid: true, transport: None }
    }

    pub fn settings(mut self, configure: impl FnOnce(&mut Settings)) -> Self {
        configure(&mut self.settings);
        self
    }

    pub fn items(mut self, items: &[(&str, &str)]) -> Self {
        self.settings.items =
            items.iter().map(|(id, section)| crate::workset::WorkItem::new(*id, *section)).collect();
        self
    }

    pub fn backend(mut self, backend: CountingBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn probe_valid(mut self, valid: bool) -> Self {
        self.probe_valid = valid;
        self
    }

    pub fn transport(mut self, transport: Arc<ScriptedTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> TestRun {
        let backend = Arc::new(self.backend);
        let probe = Arc::new(ScriptedProbe::new(self.probe_valid));
        let alerts = Arc::new(RecordingAlerts::default());
        let transport = self.transport.unwrap_or_else(|| ScriptedTransport::always("true"));
        let ctx = RunContext::new(
            self.settings,
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            Arc::clone(&backend) as Arc<dyn CredentialBackend>,
            Arc::clone(&probe) as Arc<dyn SessionProbe>,
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
            CancellationToken::new(),
        );
        let dispatcher =
            Arc::new(Dispatcher::new(&ctx, Arc::clone(&transport) as Arc<dyn Transport>));
        TestRun { clock: self.clock, backend, probe, alerts, transport, ctx, dispatcher }
    }
}
