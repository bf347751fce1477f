//! Host adapters for running the collector outside a browser.
//!
//! These back the command-line host: a fixed page, an in-memory performance
//! timeline, process-level device probes, and a JSON-lines replay format for
//! page events.

use crate::collector::{PageEvent, Subscription};
use crate::core::page::parse_do_not_track;
use crate::core::{
    DeviceProbes, LcpHandler, NavigationTiming, NavigatorFacts, NetworkInfo, ObserverError,
    PageContext, PageInfo, PaintEntry, PerformanceTimeline, ProbeFuture, ResourceEntry,
    ScreenInfo,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A page whose facts never change.
#[derive(Debug)]
pub struct StaticPage {
    info: PageInfo,
    network: Option<NetworkInfo>,
    do_not_track: AtomicBool,
}

impl StaticPage {
    pub fn new(info: PageInfo) -> Self {
        Self {
            info,
            network: None,
            do_not_track: AtomicBool::new(false),
        }
    }

    pub fn with_network(mut self, network: NetworkInfo) -> Self {
        self.network = Some(network);
        self
    }

    /// Read the do-not-track flag from the `DO_NOT_TRACK` environment variable.
    pub fn with_env_do_not_track(self) -> Self {
        let dnt = std::env::var("DO_NOT_TRACK")
            .map(|v| parse_do_not_track(&v))
            .unwrap_or(false);
        self.set_do_not_track(dnt);
        self
    }

    pub fn set_do_not_track(&self, enabled: bool) {
        self.do_not_track.store(enabled, Ordering::SeqCst);
    }
}

impl PageContext for StaticPage {
    fn page_info(&self) -> PageInfo {
        self.info.clone()
    }

    fn do_not_track(&self) -> bool {
        self.do_not_track.load(Ordering::SeqCst)
    }

    fn network_info(&self) -> Option<NetworkInfo> {
        self.network.clone()
    }
}

/// Performance timeline fed by the host.
#[derive(Default)]
pub struct StaticTimeline {
    navigation: Option<NavigationTiming>,
    paints: Vec<PaintEntry>,
    resources: Vec<ResourceEntry>,
    next_id: AtomicU64,
    lcp_observers: Arc<Mutex<BTreeMap<u64, LcpHandler>>>,
}

impl StaticTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_navigation(mut self, navigation: NavigationTiming) -> Self {
        self.navigation = Some(navigation);
        self
    }

    pub fn with_paint(mut self, name: &str, start_time: f64) -> Self {
        self.paints.push(PaintEntry {
            name: name.to_string(),
            start_time,
        });
        self
    }

    pub fn with_resources(mut self, resources: Vec<ResourceEntry>) -> Self {
        self.resources = resources;
        self
    }

    /// Deliver a largest-contentful-paint entry to every observer.
    pub fn report_lcp(&self, start_time: f64) {
        let observers: Vec<LcpHandler> = match self.lcp_observers.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for observer in observers {
            observer(start_time);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lcp_observers.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl PerformanceTimeline for StaticTimeline {
    fn navigation(&self) -> Option<NavigationTiming> {
        self.navigation.clone()
    }

    fn paint_entries(&self) -> Vec<PaintEntry> {
        self.paints.clone()
    }

    fn resource_entries(&self) -> Vec<ResourceEntry> {
        self.resources.clone()
    }

    fn observe_lcp(&self, handler: LcpHandler) -> Result<Subscription, ObserverError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lcp_observers
            .lock()
            .map_err(|_| ObserverError::Registration("observer registry poisoned".to_string()))?
            .insert(id, handler);
        let observers = Arc::downgrade(&self.lcp_observers);
        Ok(Subscription::new(move || {
            if let Some(observers) = observers.upgrade() {
                if let Ok(mut map) = observers.lock() {
                    map.remove(&id);
                }
            }
        }))
    }
}

/// Probes available to a native process.
///
/// There is no canvas, WebGL, audio graph, font renderer or plugin list, so
/// those fields stay empty; navigator facts come from the process
/// environment.
#[derive(Debug, Default)]
pub struct SystemProbes;

impl DeviceProbes for SystemProbes {
    fn canvas_pixels(&self) -> Option<Vec<u8>> {
        None
    }

    fn webgl_renderer(&self) -> Option<String> {
        None
    }

    fn audio_frequencies(&self) -> ProbeFuture<Option<Vec<f32>>> {
        Box::pin(async { None })
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
        NavigatorFacts {
            timezone: std::env::var("TZ").ok().and_then(|tz| normalize_timezone(&tz)),
            language: std::env::var("LANG").ok().and_then(|l| language_tag(&l)),
            platform: Some(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            hardware_concurrency: std::thread::available_parallelism()
                .ok()
                .map(|n| n.get() as u32),
            device_memory: None,
            max_touch_points: Some(0),
        }
    }
}

/// Canonical IANA name for a timezone string, if it is one.
pub fn normalize_timezone(value: &str) -> Option<String> {
    let value = value.trim().trim_start_matches(':');
    value.parse::<Tz>().ok().map(|tz| tz.name().to_string())
}

/// BCP 47-ish tag from a POSIX locale such as `en_US.UTF-8`.
pub fn language_tag(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    /// Wait before performing the action
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub action: ReplayAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayAction {
    /// Page event pushed through the event bus
    Event(PageEvent),
    /// Largest-contentful-paint observation
    Lcp(f64),
    /// Host call to `track_event`
    Track {
        name: String,
        #[serde(default)]
        properties: Option<serde_json::Value>,
    },
    /// Host call to `track_api_call`
    ApiCall { endpoint: String, duration_ms: f64 },
    /// Host call to `set_user_id`
    UserId(String),
}

/// Parse a JSON-lines replay. Blank lines and `#` comments are skipped.
pub fn read_replay(reader: impl BufRead) -> Result<Vec<ReplayStep>, ReplayError> {
    let mut steps = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ReplayError::IoError(e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let step = serde_json::from_str(trimmed).map_err(|e| ReplayError::ParseError {
            line: index + 1,
            message: e.to_string(),
        })?;
        steps.push(step);
    }
    Ok(steps)
}

#[derive(Debug)]
pub enum ReplayError {
    IoError(String),
    ParseError { line: usize, message: String },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::IoError(e) => write!(f, "Replay IO error: {e}"),
            ReplayError::ParseError { line, message } => {
                write!(f, "Replay parse error on line {line}: {message}")
            }
        }
    }
}

impl std::error::Error for ReplayError {}
