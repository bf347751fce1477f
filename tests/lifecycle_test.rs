//! Lifecycle tests for the telemetry collector.
//!
//! These drive a [`Tracker`] through consent changes with an in-process
//! event bus, a hand-driven clock and an in-memory sink.

use page_telemetry::collector::{EventBus, PageEvent};
use page_telemetry::config::Config;
use page_telemetry::consent::{ConsentChannel, ConsentState};
use page_telemetry::core::{
    DeviceProbes, ManualClock, MemoryStorage, NavigationTiming, NavigatorFacts, NetworkInfo,
    PageInfo, ProbeFuture, ScreenInfo, SessionStorage, StorageError, SystemClock,
};
use page_telemetry::host::{StaticPage, StaticTimeline, SystemProbes};
use page_telemetry::transport::MemorySink;
use page_telemetry::{Environment, LifecycleState, Tracker};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SESSION_KEY: &str = "analytics_session_id";

struct Harness {
    bus: EventBus,
    consent: ConsentChannel,
    clock: Arc<ManualClock>,
    storage: Arc<MemoryStorage>,
    sink: Arc<MemorySink>,
    page: Arc<StaticPage>,
    timeline: Arc<StaticTimeline>,
    config: Config,
}

impl Harness {
    fn new(consent: Option<ConsentState>) -> Self {
        Self::with_timeline(consent, StaticTimeline::new())
    }

    fn with_timeline(consent: Option<ConsentState>, timeline: StaticTimeline) -> Self {
        Self {
            bus: EventBus::new(),
            consent: ConsentChannel::with_state(consent),
            clock: Arc::new(ManualClock::new()),
            storage: Arc::new(MemoryStorage::new()),
            sink: Arc::new(MemorySink::new()),
            page: Arc::new(StaticPage::new(PageInfo {
                url: "https://app.example/cases/42".to_string(),
                title: "Case 42".to_string(),
                referrer: Some("https://app.example/cases".to_string()),
            })),
            timeline: Arc::new(timeline),
            config: Config::default(),
        }
    }

    fn env(&self) -> Environment {
        Environment {
            events: Arc::new(self.bus.clone()),
            page: self.page.clone(),
            timeline: self.timeline.clone(),
            probes: Arc::new(SystemProbes),
            storage: self.storage.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
        }
    }

    fn tracker(&self) -> Tracker {
        Tracker::new(
            self.config.clone(),
            self.env(),
            Arc::new(self.consent.clone()),
        )
    }

    fn stored_session(&self) -> Option<String> {
        self.storage.get(SESSION_KEY).unwrap()
    }

    fn grant(&self) {
        self.consent.publish(Some(ConsentState::granted("1")));
    }

    fn revoke(&self) {
        self.consent.publish(Some(ConsentState::denied("1")));
    }
}

fn click(element: &str) -> PageEvent {
    PageEvent::Click {
        x: 10.0,
        y: 20.0,
        element: element.to_string(),
    }
}

fn error(message: &str) -> PageEvent {
    PageEvent::Error {
        message: message.to_string(),
        stack: None,
    }
}

#[test]
fn test_consent_denied_at_init_collects_nothing() {
    let h = Harness::new(Some(ConsentState::denied("1")));
    let tracker = h.tracker();
    tracker.initialize();

    assert_eq!(tracker.state(), LifecycleState::Inactive);
    assert_eq!(h.bus.listener_count(), 0);
    assert_eq!(h.timeline.observer_count(), 0);

    h.bus.emit(&click("button"));
    tracker.track_event("search", None);
    tracker.flush(true);
    h.bus.emit(&PageEvent::Unload);

    assert!(h.sink.is_empty());
    assert!(h.stored_session().is_none());
    assert!(tracker.session_id().is_none());
}

#[test]
fn test_no_consent_decision_is_a_denial() {
    let h = Harness::new(None);
    let tracker = h.tracker();
    tracker.initialize();

    assert!(!tracker.is_active());
    assert_eq!(h.bus.listener_count(), 0);
}

#[test]
fn test_granted_activation_attaches_producers() {
    let h = Harness::new(Some(ConsentState::granted("2")));
    let tracker = h.tracker();
    tracker.initialize();

    assert_eq!(tracker.state(), LifecycleState::Active);
    assert_eq!(h.bus.listener_count(), 1);
    assert_eq!(h.timeline.observer_count(), 1);

    let session_id = tracker.session_id().unwrap();
    assert!(session_id.starts_with("sess_"));
    assert_eq!(h.stored_session(), Some(session_id));
    assert_eq!(tracker.transparency().stats().activations, 1);
}

#[test]
fn test_initialize_is_idempotent() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();
    tracker.initialize();

    assert_eq!(h.consent.listener_count(), 1);
    assert_eq!(h.bus.listener_count(), 1);
}

#[test]
fn test_mouse_moves_are_throttled() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    // 300 moves spread over 900ms
    for i in 0..300 {
        h.bus.emit(&PageEvent::MouseMove {
            x: i as f64,
            y: i as f64,
        });
        h.clock.advance_ms(3);
    }

    let payload = tracker.current_payload().unwrap();
    let kept = payload.behavior.mouse_movements.len();
    assert!((8..=9).contains(&kept), "kept {kept} samples");
    assert_eq!(payload.behavior.mouse_movements.first().unwrap().x, 0.0);

    let stats = tracker.transparency().stats();
    assert_eq!(stats.events_recorded as usize, kept);
    assert_eq!(stats.samples_throttled as usize, 300 - kept);
}

#[test]
fn test_buffers_stay_bounded() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    for i in 0..1000 {
        h.bus.emit(&click(&format!("item-{i}")));
        h.bus.emit(&PageEvent::MouseMove {
            x: i as f64,
            y: 0.0,
        });
        h.clock.advance_ms(200);
        tracker.track_event("scrolled_list", None);
        tracker.track_api_call("/api/cases", i as f64);
    }

    let limits = &h.config.limits;
    let payload = tracker.current_payload().unwrap();
    assert_eq!(payload.behavior.clicks.len(), limits.clicks);
    assert_eq!(payload.behavior.mouse_movements.len(), limits.mouse_movements);
    assert_eq!(payload.behavior.interactions.len(), limits.interactions);
    assert_eq!(
        payload.performance.api_latencies["/api/cases"].len(),
        limits.api_latency_samples
    );

    // FIFO: the newest entries survive
    assert_eq!(payload.behavior.clicks.last().unwrap().element, "item-999");
    assert_eq!(payload.behavior.clicks.first().unwrap().element, "item-800");
    assert_eq!(
        payload.events_count,
        limits.clicks + limits.mouse_movements + limits.interactions
    );
}

#[test]
fn test_error_buffer_keeps_most_recent() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    for i in 0..60 {
        h.bus.emit(&error(&format!("error {i}")));
    }

    let payload = tracker.current_payload().unwrap();
    assert_eq!(payload.errors.len(), 50);
    assert_eq!(payload.errors[0].message, "error 10");
    assert_eq!(payload.errors[49].message, "error 59");
    assert_eq!(tracker.transparency().stats().errors_captured, 60);
}

#[test]
fn test_unhandled_rejection_message() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    h.bus.emit(&PageEvent::UnhandledRejection {
        reason: "timeout".to_string(),
    });

    let payload = tracker.current_payload().unwrap();
    assert_eq!(
        payload.errors[0].message,
        "Unhandled promise rejection: timeout"
    );
}

#[test]
fn test_flush_clears_errors_and_keeps_behavior() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    h.bus.emit(&click("save"));
    h.bus.emit(&error("boom"));
    tracker.flush(true);

    let sent = h.sink.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].errors.len(), 1);
    assert_eq!(sent[0].behavior.clicks.len(), 1);

    h.clock.advance_ms(10_000);
    tracker.flush(true);

    let sent = h.sink.take();
    assert!(sent[0].errors.is_empty());
    assert_eq!(sent[0].behavior.clicks.len(), 1);
}

#[test]
fn test_flush_throttle() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    tracker.flush(false);
    assert_eq!(h.sink.len(), 1);

    h.clock.advance_ms(2_000);
    tracker.flush(false);
    assert_eq!(h.sink.len(), 1);
    assert_eq!(tracker.transparency().stats().flushes_throttled, 1);

    // Forced flushes ignore the throttle
    tracker.flush(true);
    assert_eq!(h.sink.len(), 2);

    h.clock.advance_ms(5_000);
    tracker.flush(false);
    assert_eq!(h.sink.len(), 3);
}

#[test]
fn test_unload_flush_bypasses_throttle() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    tracker.flush(false);
    h.clock.advance_ms(2_000);
    h.bus.emit(&PageEvent::Unload);

    assert_eq!(h.sink.len(), 2);
    assert_eq!(tracker.transparency().stats().flushes_sent, 2);
}

#[test]
fn test_scroll_depth_is_monotonic_and_resets() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    let scroll = |top: f64| PageEvent::Scroll {
        scroll_top: top,
        viewport_height: 500.0,
        document_height: 2000.0,
    };

    h.bus.emit(&scroll(500.0));
    assert_eq!(tracker.current_payload().unwrap().behavior.scroll_depth, 50);

    h.bus.emit(&scroll(200.0));
    assert_eq!(tracker.current_payload().unwrap().behavior.scroll_depth, 50);

    h.bus.emit(&scroll(1500.0));
    assert_eq!(tracker.current_payload().unwrap().behavior.scroll_depth, 100);

    h.revoke();
    h.grant();
    assert_eq!(tracker.current_payload().unwrap().behavior.scroll_depth, 0);
}

#[test]
fn test_time_on_page_in_payload() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    h.clock.advance(Duration::from_millis(7_500));
    tracker.flush(true);

    let sent = h.sink.take();
    assert_eq!(sent[0].behavior.time_on_page, 7);
}

#[test]
fn test_session_id_survives_reinitialization() {
    let h = Harness::new(Some(ConsentState::granted("1")));

    let first = h.tracker();
    first.initialize();
    let session_id = first.session_id().unwrap();
    first.shutdown();

    // Shutdown keeps the persisted id for the next page
    assert_eq!(h.stored_session(), Some(session_id.clone()));

    let second = h.tracker();
    second.initialize();
    assert_eq!(second.session_id(), Some(session_id));
}

#[test]
fn test_revoke_then_grant_starts_new_session() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();
    let before = tracker.session_id().unwrap();

    h.revoke();
    assert!(h.stored_session().is_none());
    assert_eq!(tracker.state(), LifecycleState::Inactive);

    h.grant();
    let after = tracker.session_id().unwrap();
    assert_ne!(before, after);
    assert_eq!(h.stored_session(), Some(after));
}

#[test]
fn test_consent_round_trip_scenario() {
    let h = Harness::new(Some(ConsentState::denied("1")));
    let tracker = h.tracker();
    tracker.initialize();

    tracker.track_event("ignored", None);
    assert!(tracker.current_payload().is_none());

    h.grant();
    assert_eq!(h.bus.listener_count(), 1);
    tracker.track_event(
        "filter_applied",
        Some(serde_json::json!({ "field": "status" })),
    );

    let payload = tracker.current_payload().unwrap();
    assert_eq!(payload.behavior.interactions.len(), 1);
    let interaction = payload.behavior.interactions.first().unwrap();
    assert_eq!(interaction.kind, "filter_applied");
    assert_eq!(interaction.target, "custom_event");
    assert_eq!(
        interaction.properties,
        Some(serde_json::json!({ "field": "status" }))
    );

    h.revoke();
    assert!(tracker.current_payload().is_none());
    assert!(h.stored_session().is_none());
    assert_eq!(h.bus.listener_count(), 0);
    assert_eq!(h.timeline.observer_count(), 0);
    // Revocation discards without flushing
    assert!(h.sink.is_empty());
}

#[test]
fn test_revoke_clears_user_id() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();
    tracker.set_user_id("analyst-7");
    tracker.flush(true);
    assert_eq!(h.sink.take()[0].user_id.as_deref(), Some("analyst-7"));

    h.revoke();
    h.grant();
    tracker.flush(true);
    assert!(h.sink.take()[0].user_id.is_none());
}

#[test]
fn test_do_not_track_overrides_consent() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    h.page.set_do_not_track(true);
    let tracker = h.tracker();
    tracker.initialize();

    assert!(!tracker.is_active());
    assert_eq!(h.bus.listener_count(), 0);

    tracker.track_event("search", None);
    tracker.flush(true);
    assert!(h.sink.is_empty());
    assert!(h.stored_session().is_none());
}

#[test]
fn test_shutdown_tears_everything_down() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();
    assert_eq!(h.consent.listener_count(), 1);

    tracker.shutdown();

    assert_eq!(tracker.state(), LifecycleState::ShutDown);
    assert_eq!(h.consent.listener_count(), 0);
    assert_eq!(h.bus.listener_count(), 0);
    assert_eq!(h.timeline.observer_count(), 0);

    // Consent changes after shutdown are not observed
    h.revoke();
    h.grant();
    assert_eq!(tracker.state(), LifecycleState::ShutDown);
    assert!(h.sink.is_empty());
}

#[test]
fn test_public_call_after_shutdown_reinitializes() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();
    tracker.shutdown();

    tracker.track_event("returned", None);

    assert!(tracker.is_active());
    assert_eq!(h.consent.listener_count(), 1);
    let payload = tracker.current_payload().unwrap();
    assert_eq!(payload.behavior.interactions.len(), 1);
}

#[test]
fn test_payload_carries_page_and_performance() {
    let timeline = StaticTimeline::new()
        .with_navigation(NavigationTiming {
            navigation_start: 0.0,
            request_start: 20.0,
            response_start: 80.0,
            dom_interactive: 300.0,
            dom_content_loaded_event_end: 450.0,
            load_event_end: 900.0,
        })
        .with_paint("first-contentful-paint", 210.0);
    let h = Harness::with_timeline(Some(ConsentState::granted("3")), timeline);
    let tracker = h.tracker();
    tracker.initialize();

    h.timeline.report_lcp(640.0);
    h.timeline.report_lcp(820.0);
    tracker.flush(true);

    let sent = h.sink.take();
    let payload = &sent[0];
    assert_eq!(payload.page.title, "Case 42");
    assert_eq!(payload.consent_version.as_deref(), Some("3"));
    assert_eq!(payload.performance.page_load_time, Some(900.0));
    assert_eq!(payload.performance.time_to_first_byte, Some(60.0));
    assert_eq!(payload.performance.first_contentful_paint, Some(210.0));
    assert_eq!(payload.performance.first_paint, None);
    assert_eq!(payload.performance.largest_contentful_paint, Some(820.0));
    assert!(payload.timestamp.ends_with('Z'));
}

#[test]
fn test_stale_lcp_observer_is_ignored() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    h.revoke();
    h.timeline.report_lcp(500.0);
    h.grant();

    let payload = tracker.current_payload().unwrap();
    assert!(payload.performance.largest_contentful_paint.is_none());
}

#[tokio::test]
async fn test_fingerprint_populated_in_background() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let payload = tracker.current_payload().unwrap();
    let fingerprint = payload.fingerprint.expect("fingerprint computed");
    assert!(!fingerprint.timezone.is_empty());
}

#[tokio::test]
async fn test_flush_timer_runs_and_stops_on_revoke() {
    let mut h = Harness::new(Some(ConsentState::granted("1")));
    h.config.flush_interval = Duration::from_millis(20);
    h.config.min_flush_interval = Duration::ZERO;
    let tracker = Tracker::new(
        h.config.clone(),
        Environment {
            clock: Arc::new(SystemClock::new()),
            ..h.env()
        },
        Arc::new(h.consent.clone()),
    );
    tracker.initialize();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let sent = h.sink.len();
    assert!(sent >= 2, "only {sent} timed flushes");

    h.revoke();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.sink.len(), sent);
}

/// Storage whose first read races a consent revocation.
struct RevokingStorage {
    consent: ConsentChannel,
    inner: MemoryStorage,
    fired: AtomicBool,
}

impl SessionStorage for RevokingStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.consent.publish(Some(ConsentState::denied("1")));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}

#[test]
fn test_revocation_during_activation_wins() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let storage = Arc::new(RevokingStorage {
        consent: h.consent.clone(),
        inner: MemoryStorage::new(),
        fired: AtomicBool::new(false),
    });
    let tracker = Tracker::new(
        h.config.clone(),
        Environment {
            storage: storage.clone(),
            ..h.env()
        },
        Arc::new(h.consent.clone()),
    );
    tracker.initialize();

    assert_eq!(tracker.state(), LifecycleState::Inactive);
    assert_eq!(h.bus.listener_count(), 0);
    assert_eq!(h.timeline.observer_count(), 0);
    assert!(storage.inner.get(SESSION_KEY).unwrap().is_none());

    tracker.flush(true);
    assert!(h.sink.is_empty());

    // A later grant still activates normally
    h.grant();
    assert!(tracker.is_active());
    assert!(storage.inner.get(SESSION_KEY).unwrap().is_some());
}

#[test]
fn test_reactivation_attaches_producers_once() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let tracker = h.tracker();
    tracker.initialize();

    for _ in 0..3 {
        h.revoke();
        h.grant();
    }
    tracker.initialize();

    assert!(tracker.is_active());
    assert_eq!(h.consent.listener_count(), 1);
    assert_eq!(h.bus.listener_count(), 1);
    assert_eq!(h.timeline.observer_count(), 1);

    h.bus.emit(&click("save"));
    let payload = tracker.current_payload().unwrap();
    assert_eq!(payload.behavior.clicks.len(), 1);
    assert_eq!(tracker.transparency().stats().activations, 4);
}

#[test]
fn test_network_info_in_payload() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let page = StaticPage::new(PageInfo {
        url: "https://app.example/".to_string(),
        title: "Home".to_string(),
        referrer: None,
    })
    .with_network(NetworkInfo {
        effective_type: "4g".to_string(),
        downlink: 9.5,
        rtt: 50,
        save_data: false,
    });
    let tracker = Tracker::new(
        h.config.clone(),
        Environment {
            page: Arc::new(page),
            ..h.env()
        },
        Arc::new(h.consent.clone()),
    );
    tracker.initialize();
    tracker.flush(true);

    let sent = h.sink.take();
    let network = sent[0].network.as_ref().unwrap();
    assert_eq!(network.effective_type, "4g");
    assert_eq!(network.rtt, 50);
}

/// Audio probe whose first run is fast and later runs are slow.
#[derive(Default)]
struct SlowAudioProbes {
    calls: AtomicU32,
}

impl DeviceProbes for SlowAudioProbes {
    fn canvas_pixels(&self) -> Option<Vec<u8>> {
        None
    }

    fn webgl_renderer(&self) -> Option<String> {
        None
    }

    fn audio_frequencies(&self) -> ProbeFuture<Option<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = if call == 1 { 100 } else { 250 };
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Some(vec![call as f32])
        })
    }

    fn text_width(&self, _font_stack: &str) -> Option<f64> {
        None
    }

    fn plugins(&self) -> Option<Vec<String>> {
        None
    }

    fn screen(&self) -> Option<ScreenInfo> {
        None
    }

    fn navigator(&self) -> NavigatorFacts {
        NavigatorFacts::default()
    }
}

#[tokio::test]
async fn test_stale_fingerprint_is_discarded() {
    let h = Harness::new(Some(ConsentState::granted("1")));
    let probes = Arc::new(SlowAudioProbes::default());
    let tracker = Tracker::new(
        h.config.clone(),
        Environment {
            probes: probes.clone(),
            ..h.env()
        },
        Arc::new(h.consent.clone()),
    );
    tracker.initialize();
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.revoke();
    h.grant();

    // The first job has finished by now, but its activation is gone.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(tracker.current_payload().unwrap().fingerprint.is_none());

    tokio::time::sleep(Duration::from_millis(250)).await;
    let fingerprint = tracker.current_payload().unwrap().fingerprint.unwrap();
    assert_eq!(fingerprint.audio, "2.000000");
    assert_eq!(probes.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reactivation_runs_one_flush_timer() {
    let mut h = Harness::new(Some(ConsentState::granted("1")));
    h.config.flush_interval = Duration::from_millis(40);
    h.config.min_flush_interval = Duration::ZERO;
    let tracker = Tracker::new(
        h.config.clone(),
        Environment {
            clock: Arc::new(SystemClock::new()),
            ..h.env()
        },
        Arc::new(h.consent.clone()),
    );
    tracker.initialize();

    for _ in 0..3 {
        h.revoke();
        h.grant();
    }
    assert_eq!(h.bus.listener_count(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    tracker.shutdown();

    // One 40ms timer yields about ten flushes; four would yield about forty.
    let sent = h.sink.len();
    assert!((4..=14).contains(&sent), "{sent} timed flushes");
}
