//! The consent-gated collector.
//!
//! A [`Tracker`] owns every mutable buffer. It moves between
//! `Uninitialized → Inactive ⇄ Active → ShutDown` driven by consent changes
//! and explicit [`Tracker::initialize`] / [`Tracker::shutdown`] calls.
//!
//! Activation allocates fresh buffers, restores the session id, starts the
//! fingerprint job, attaches the page listeners and the LCP observer, takes
//! the one-shot performance readings and starts the flush and tick timers.
//! Deactivation tears all of that down before returning and discards the
//! buffers without flushing them.
//!
//! Every background completion (listener, observer, timer, fingerprint job)
//! carries the epoch of the activation that started it and is ignored if
//! that activation is gone.

use crate::collector::{scroll_depth_percent, EventHandler, EventSource, PageEvent, Subscription};
use crate::config::Config;
use crate::consent::{ConsentGateway, ConsentState};
use crate::core::{
    compute_fingerprint, BehaviorRecorder, BoundedBuffer, Clock, DeviceFingerprint, DeviceProbes,
    ErrorRecord, NetworkInfo, PageContext, PageInfo, PerformanceMetrics, PerformanceTimeline,
    SessionManager, SessionStorage, TelemetryPayload,
};
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use crate::transport::TelemetrySink;
use chrono::SecondsFormat;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Host capabilities the collector runs against.
#[derive(Clone)]
pub struct Environment {
    pub events: Arc<dyn EventSource>,
    pub page: Arc<dyn PageContext>,
    pub timeline: Arc<dyn PerformanceTimeline>,
    pub probes: Arc<dyn DeviceProbes>,
    pub storage: Arc<dyn SessionStorage>,
    pub sink: Arc<dyn TelemetrySink>,
    pub clock: Arc<dyn Clock>,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Inactive,
    Active,
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Initialized,
    ShutDown,
}

/// Handle to the collector. Clones share one instance.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    env: Environment,
    consent: Arc<dyn ConsentGateway>,
    session: SessionManager,
    transparency: SharedTransparencyLog,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    phase: Phase,
    consent_subscription: Option<Subscription>,
    consent_version: Option<String>,
    /// Bumped on every consent change; an activation started under an
    /// older value is abandoned.
    consent_generation: u64,
    user_id: Option<String>,
    next_epoch: u64,
    active: Option<ActiveSession>,
}

/// Everything that exists only while active.
struct ActiveSession {
    epoch: u64,
    session_id: String,
    activated_at_ms: u64,
    recorder: BehaviorRecorder,
    performance: PerformanceMetrics,
    errors: BoundedBuffer<ErrorRecord>,
    fingerprint: Option<DeviceFingerprint>,
    last_flush_ms: Option<u64>,
    subscriptions: Vec<Subscription>,
    tasks: Vec<TaskGuard>,
}

/// Aborts a background task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Tracker {
    pub fn new(config: Config, env: Environment, consent: Arc<dyn ConsentGateway>) -> Self {
        Self::with_transparency(config, env, consent, create_shared_log())
    }

    pub fn with_transparency(
        config: Config,
        env: Environment,
        consent: Arc<dyn ConsentGateway>,
        transparency: SharedTransparencyLog,
    ) -> Self {
        let session = SessionManager::new(env.storage.clone(), config.session_key.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                env,
                consent,
                session,
                transparency,
                state: Mutex::new(TrackerState {
                    phase: Phase::Uninitialized,
                    consent_subscription: None,
                    consent_version: None,
                    consent_generation: 0,
                    user_id: None,
                    next_epoch: 0,
                    active: None,
                }),
            }),
        }
    }

    /// Subscribe to consent changes and apply the current consent.
    ///
    /// Does nothing if already initialized.
    pub fn initialize(&self) {
        Inner::initialize(&self.inner);
    }

    /// Unsubscribe from consent, deactivate, and reset to a clean slate.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn set_user_id(&self, id: &str) {
        if !self.inner.ensure_active() {
            return;
        }
        let mut state = self.inner.lock_state();
        if state.active.is_some() {
            state.user_id = Some(id.to_string());
        }
    }

    /// Record a custom interaction.
    pub fn track_event(&self, name: &str, properties: Option<serde_json::Value>) {
        if !self.inner.ensure_active() {
            return;
        }
        let timestamp = self.inner.env.clock.epoch_ms();
        let recorded = self.inner.with_active(None, |active| {
            active
                .recorder
                .record_interaction(name, "custom_event", properties, timestamp);
        });
        if recorded.is_some() {
            self.inner.transparency.record_event();
        }
    }

    /// Record how long a call to `endpoint` took.
    pub fn track_api_call(&self, endpoint: &str, duration_ms: f64) {
        if !self.inner.ensure_active() {
            return;
        }
        self.inner.with_active(None, |active| {
            active.performance.record_api_latency(endpoint, duration_ms);
        });
    }

    /// Send the current buffers. Non-forced flushes respect the throttle.
    pub fn flush(&self, force: bool) {
        self.inner.flush(None, force);
    }

    /// Forced flush for page teardown.
    pub fn flush_on_unload(&self) {
        self.inner.flush(None, true);
    }

    pub fn state(&self) -> LifecycleState {
        let state = self.inner.lock_state();
        match (state.phase, state.active.is_some()) {
            (_, true) => LifecycleState::Active,
            (Phase::Uninitialized, false) => LifecycleState::Uninitialized,
            (Phase::Initialized, false) => LifecycleState::Inactive,
            (Phase::ShutDown, false) => LifecycleState::ShutDown,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Session id of the current activation.
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .lock_state()
            .active
            .as_ref()
            .map(|a| a.session_id.clone())
    }

    /// What a flush would send right now, without sending it.
    pub fn current_payload(&self) -> Option<TelemetryPayload> {
        let ctx = self.inner.flush_context();
        let mut state = self.inner.lock_state();
        let user_id = state.user_id.clone();
        let consent_version = state.consent_version.clone();
        let active = state.active.as_mut()?;
        let errors = active.errors.to_vec();
        Some(active.payload(ctx, user_id, consent_version, errors))
    }

    pub fn transparency(&self) -> &SharedTransparencyLog {
        &self.inner.transparency
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn initialize(this: &Arc<Self>) {
        {
            let mut state = this.lock_state();
            if state.phase == Phase::Initialized {
                return;
            }
            state.phase = Phase::Initialized;
        }

        let weak = Arc::downgrade(this);
        let subscription = this
            .consent
            .on_consent_change(Arc::new(move |consent: Option<&ConsentState>| {
                if let Some(inner) = weak.upgrade() {
                    Inner::apply_consent(&inner, consent);
                }
            }));

        {
            let mut state = this.lock_state();
            if state.phase != Phase::Initialized {
                // Shut down while subscribing.
                drop(state);
                subscription.cancel();
                return;
            }
            state.consent_subscription = Some(subscription);
        }

        tracing::debug!("Telemetry collector initialized");
        let current = this.consent.get_consent();
        Inner::apply_consent(this, current.as_ref());
    }

    fn shutdown(&self) {
        let (subscription, active) = {
            let mut state = self.lock_state();
            state.phase = Phase::ShutDown;
            state.user_id = None;
            state.consent_version = None;
            (state.consent_subscription.take(), state.active.take())
        };
        drop(subscription);
        drop(active);
        tracing::debug!("Telemetry collector shut down");
    }

    fn consent_allows(&self, consent: Option<&ConsentState>) -> bool {
        consent.map_or(false, |c| c.analytics) && !self.env.page.do_not_track()
    }

    fn apply_consent(this: &Arc<Self>, consent: Option<&ConsentState>) {
        {
            let mut state = this.lock_state();
            if state.phase != Phase::Initialized {
                return;
            }
            state.consent_version = consent.map(|c| c.version.clone());
            state.consent_generation += 1;
        }

        if this.consent_allows(consent) {
            Inner::activate(this);
        } else {
            this.deactivate();
        }
    }

    /// Initialize if needed and make sure the collector is active when
    /// consent allows it. Returns whether it is active.
    fn ensure_active(self: &Arc<Self>) -> bool {
        Inner::initialize(self);
        let consent = self.consent.get_consent();
        if self.consent_allows(consent.as_ref()) {
            Inner::activate(self);
        }
        self.lock_state().active.is_some()
    }

    fn activate(this: &Arc<Self>) {
        let generation = {
            let state = this.lock_state();
            if state.phase != Phase::Initialized || state.active.is_some() {
                return;
            }
            state.consent_generation
        };
        // Read after the generation so a later revocation is always noticed.
        if !this.consent_allows(this.consent.get_consent().as_ref()) {
            return;
        }

        let limits = &this.config.limits;
        let performance = PerformanceMetrics::sample(this.env.timeline.as_ref(), limits);
        let session_id = this.session.restore_or_create();
        let activated_at_ms = this.env.clock.monotonic_ms();

        let epoch = {
            let mut state = this.lock_state();
            if state.consent_generation != generation {
                // Consent changed while sampling. Whoever applied the new
                // consent owns activation; only undo the id we may have stored.
                drop(state);
                if !this.consent_allows(this.consent.get_consent().as_ref()) {
                    this.session.clear();
                }
                return;
            }
            if state.phase != Phase::Initialized || state.active.is_some() {
                return;
            }
            state.next_epoch += 1;
            let epoch = state.next_epoch;
            state.active = Some(ActiveSession {
                epoch,
                session_id,
                activated_at_ms,
                recorder: BehaviorRecorder::new(
                    limits,
                    this.config.mouse_sample_interval.as_millis() as u64,
                ),
                performance,
                errors: BoundedBuffer::new(limits.errors),
                fingerprint: None,
                last_flush_ms: None,
                subscriptions: Vec::new(),
                tasks: Vec::new(),
            });
            epoch
        };

        // Attach producers outside the lock: hosts may call back synchronously.
        let subscriptions = this.attach_listeners(epoch);
        let tasks = Inner::start_background(this, epoch);

        let mut state = this.lock_state();
        match state.active.as_mut() {
            Some(active) if active.epoch == epoch => {
                active.subscriptions = subscriptions;
                active.tasks = tasks;
                drop(state);
                this.transparency.record_activation();
                tracing::debug!(epoch, "Telemetry collector active");
            }
            _ => {
                // Deactivated while attaching.
                drop(state);
                drop(subscriptions);
                drop(tasks);
            }
        }
    }

    fn deactivate(&self) {
        let previous = {
            let mut state = self.lock_state();
            state.user_id = None;
            state.active.take()
        };
        self.session.clear();
        if let Some(active) = previous {
            tracing::debug!(epoch = active.epoch, "Telemetry collector inactive");
            drop(active);
        }
    }

    fn attach_listeners(self: &Arc<Self>, epoch: u64) -> Vec<Subscription> {
        let mut subscriptions = Vec::new();

        let weak = Arc::downgrade(self);
        let handler: EventHandler = Arc::new(move |event: &PageEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(epoch, event);
            }
        });
        subscriptions.push(self.env.events.subscribe(handler));

        let weak = Arc::downgrade(self);
        let observed = self.env.timeline.observe_lcp(Arc::new(move |start_time: f64| {
            if let Some(inner) = weak.upgrade() {
                inner.with_active(Some(epoch), |active| {
                    active.performance.record_lcp(start_time);
                });
            }
        }));
        match observed {
            Ok(subscription) => subscriptions.push(subscription),
            Err(e) => crate::dev_warn!("LCP observer unavailable: {e}"),
        }

        subscriptions
    }

    fn start_background(this: &Arc<Self>, epoch: u64) -> Vec<TaskGuard> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                crate::dev_warn!("No async runtime: timers and fingerprinting disabled");
                return Vec::new();
            }
        };

        let mut tasks = Vec::new();

        let weak = Arc::downgrade(this);
        tasks.push(spawn_interval(
            &handle,
            this.config.flush_interval,
            weak,
            move |inner: &Inner| inner.flush(Some(epoch), false),
        ));

        let weak = Arc::downgrade(this);
        tasks.push(spawn_interval(
            &handle,
            this.config.tick_interval,
            weak,
            move |inner: &Inner| inner.tick(epoch),
        ));

        let weak = Arc::downgrade(this);
        let probes: Arc<dyn DeviceProbes> = this.env.probes.clone();
        tasks.push(TaskGuard(handle.spawn(async move {
            let job = tokio::spawn(compute_fingerprint(probes));
            match job.await {
                Ok(fingerprint) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.with_active(Some(epoch), |active| {
                            active.fingerprint = Some(fingerprint);
                        });
                    }
                }
                Err(e) => crate::dev_warn!("Fingerprint computation failed: {e}"),
            }
        })));

        tasks
    }

    /// Run `f` against the active session, optionally only if it is the
    /// activation identified by `epoch`.
    fn with_active<R>(
        &self,
        epoch: Option<u64>,
        f: impl FnOnce(&mut ActiveSession) -> R,
    ) -> Option<R> {
        let mut state = self.lock_state();
        let active = state.active.as_mut()?;
        if epoch.map_or(false, |e| e != active.epoch) {
            return None;
        }
        Some(f(active))
    }

    fn handle_event(&self, epoch: u64, event: &PageEvent) {
        tracing::trace!(epoch, kind = event.kind(), "Page event");
        if let PageEvent::Unload = event {
            self.flush(None, true);
            return;
        }

        let now_ms = self.env.clock.monotonic_ms();
        let timestamp = self.env.clock.epoch_ms();
        let transparency = &self.transparency;

        self.with_active(Some(epoch), |active| match event {
            PageEvent::MouseMove { x, y } => {
                if active.recorder.record_mouse_move(*x, *y, now_ms, timestamp) {
                    transparency.record_event();
                } else {
                    transparency.record_throttled_sample();
                }
            }
            PageEvent::Click { x, y, element } => {
                active.recorder.record_click(*x, *y, element, timestamp);
                transparency.record_event();
            }
            PageEvent::Scroll {
                scroll_top,
                viewport_height,
                document_height,
            } => {
                let depth = scroll_depth_percent(*scroll_top, *viewport_height, *document_height);
                active.recorder.record_scroll_depth(depth);
            }
            PageEvent::Error { message, stack } => {
                active
                    .errors
                    .push(ErrorRecord::exception(message.clone(), stack.clone(), timestamp));
                transparency.record_error_captured();
            }
            PageEvent::UnhandledRejection { reason } => {
                active
                    .errors
                    .push(ErrorRecord::unhandled_rejection(reason, timestamp));
                transparency.record_error_captured();
            }
            PageEvent::Unload => {}
        });
    }

    fn tick(&self, epoch: u64) {
        let now_ms = self.env.clock.monotonic_ms();
        self.with_active(Some(epoch), |active| {
            active
                .recorder
                .update_time_on_page(active.activated_at_ms, now_ms);
        });
    }

    fn flush_context(&self) -> FlushContext {
        FlushContext {
            page: self.env.page.page_info(),
            network: self.env.page.network_info(),
            timestamp: self
                .env
                .clock
                .now_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            now_ms: self.env.clock.monotonic_ms(),
        }
    }

    fn flush(&self, epoch: Option<u64>, force: bool) {
        let ctx = self.flush_context();
        let min_interval_ms = self.config.min_flush_interval.as_millis() as u64;

        let payload = {
            let mut state = self.lock_state();
            let user_id = state.user_id.clone();
            let consent_version = state.consent_version.clone();
            let Some(active) = state.active.as_mut() else {
                return;
            };
            if epoch.map_or(false, |e| e != active.epoch) {
                return;
            }
            if !force {
                if let Some(last) = active.last_flush_ms {
                    if ctx.now_ms.saturating_sub(last) < min_interval_ms {
                        self.transparency.record_flush_throttled();
                        return;
                    }
                }
            }
            active.last_flush_ms = Some(ctx.now_ms);

            // Errors count as reported once a send is attempted.
            let errors = active.errors.to_vec();
            active.errors.clear();

            active.payload(ctx, user_id, consent_version, errors)
        };

        self.env.sink.send(&payload);
        self.transparency.record_flush_sent();
    }
}

/// Page-level facts read before taking the state lock.
struct FlushContext {
    page: PageInfo,
    network: Option<NetworkInfo>,
    timestamp: String,
    now_ms: u64,
}

impl ActiveSession {
    fn payload(
        &mut self,
        ctx: FlushContext,
        user_id: Option<String>,
        consent_version: Option<String>,
        errors: Vec<ErrorRecord>,
    ) -> TelemetryPayload {
        self.recorder
            .update_time_on_page(self.activated_at_ms, ctx.now_ms);
        let behavior = self.recorder.behavior();
        TelemetryPayload {
            session_id: self.session_id.clone(),
            user_id,
            fingerprint: self.fingerprint.clone(),
            behavior: behavior.clone(),
            performance: self.performance.clone(),
            network: ctx.network,
            errors,
            timestamp: ctx.timestamp,
            page: ctx.page,
            consent_version,
            events_count: behavior.sample_count(),
        }
    }
}

fn spawn_interval(
    handle: &Handle,
    period: Duration,
    inner: Weak<Inner>,
    action: impl Fn(&Inner) + Send + 'static,
) -> TaskGuard {
    let period = period.max(Duration::from_millis(1));
    TaskGuard(handle.spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match inner.upgrade() {
                Some(inner) => action(&inner),
                None => break,
            }
        }
    }))
}
