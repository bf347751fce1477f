//! Performance sampling.
//!
//! Navigation and paint timings plus the resource snapshot are read once at
//! activation. Largest contentful paint arrives lazily and is tracked through
//! an observer for as long as the collector stays active. API latencies are
//! contributed by the host.

use crate::collector::Subscription;
use crate::core::buffer::{BoundedBuffer, BufferLimits};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Raw navigation timing marks, in milliseconds on the page timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationTiming {
    pub navigation_start: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub dom_interactive: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

/// A paint timing entry such as `first-paint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintEntry {
    pub name: String,
    pub start_time: f64,
}

/// One fetched resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    pub name: String,
    pub initiator_type: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_size: Option<u64>,
}

/// Callback receiving each new largest-contentful-paint start time.
pub type LcpHandler = Arc<dyn Fn(f64) + Send + Sync>;

/// Failure to attach a performance observer.
#[derive(Debug)]
pub enum ObserverError {
    Unsupported(String),
    Registration(String),
}

impl std::fmt::Display for ObserverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObserverError::Unsupported(kind) => write!(f, "Observer type not supported: {kind}"),
            ObserverError::Registration(e) => write!(f, "Observer registration failed: {e}"),
        }
    }
}

impl std::error::Error for ObserverError {}

/// The platform performance timeline.
pub trait PerformanceTimeline: Send + Sync {
    fn navigation(&self) -> Option<NavigationTiming>;

    fn paint_entries(&self) -> Vec<PaintEntry>;

    /// Resource entries in the order the platform recorded them.
    fn resource_entries(&self) -> Vec<ResourceEntry>;

    fn observe_lcp(&self, handler: LcpHandler) -> Result<Subscription, ObserverError>;
}

/// Performance numbers for one activation period.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub page_load_time: Option<f64>,
    pub dom_content_loaded: Option<f64>,
    pub time_to_first_byte: Option<f64>,
    pub dom_interactive: Option<f64>,
    pub first_paint: Option<f64>,
    pub first_contentful_paint: Option<f64>,
    pub largest_contentful_paint: Option<f64>,
    pub api_latencies: BTreeMap<String, BoundedBuffer<f64>>,
    pub resource_timings: Vec<ResourceEntry>,
    #[serde(skip)]
    api_latency_cap: usize,
}

impl PerformanceMetrics {
    /// Empty metrics with no timeline readings.
    pub fn empty(limits: &BufferLimits) -> Self {
        Self {
            page_load_time: None,
            dom_content_loaded: None,
            time_to_first_byte: None,
            dom_interactive: None,
            first_paint: None,
            first_contentful_paint: None,
            largest_contentful_paint: None,
            api_latencies: BTreeMap::new(),
            resource_timings: Vec::new(),
            api_latency_cap: limits.api_latency_samples,
        }
    }

    /// Take the one-shot readings from the timeline.
    pub fn sample(timeline: &dyn PerformanceTimeline, limits: &BufferLimits) -> Self {
        let mut metrics = Self::empty(limits);

        if let Some(nav) = timeline.navigation() {
            metrics.page_load_time = positive_delta(nav.load_event_end, nav.navigation_start);
            metrics.dom_content_loaded =
                positive_delta(nav.dom_content_loaded_event_end, nav.navigation_start);
            metrics.time_to_first_byte = positive_delta(nav.response_start, nav.request_start);
            metrics.dom_interactive = positive_delta(nav.dom_interactive, nav.navigation_start);
        }

        for entry in timeline.paint_entries() {
            match entry.name.as_str() {
                "first-paint" => metrics.first_paint = Some(entry.start_time),
                "first-contentful-paint" => metrics.first_contentful_paint = Some(entry.start_time),
                _ => {}
            }
        }

        let mut resources = timeline.resource_entries();
        let excess = resources.len().saturating_sub(limits.resource_timings);
        resources.drain(..excess);
        metrics.resource_timings = resources;

        metrics
    }

    /// Replace the LCP value with a newer observation.
    pub fn record_lcp(&mut self, start_time: f64) {
        if start_time.is_finite() && start_time >= 0.0 {
            self.largest_contentful_paint = Some(start_time);
        }
    }

    pub fn record_api_latency(&mut self, endpoint: &str, duration_ms: f64) {
        let cap = self.api_latency_cap;
        self.api_latencies
            .entry(endpoint.to_string())
            .or_insert_with(|| BoundedBuffer::new(cap))
            .push(duration_ms);
    }
}

fn positive_delta(end: f64, start: f64) -> Option<f64> {
    let delta = end - start;
    (delta.is_finite() && delta > 0.0).then_some(delta)
}
