//! User behavior buffers and the recorder that fills them.
//!
//! Mouse movement is sampled: a move arriving sooner than the sample
//! interval after the last kept sample is dropped before it reaches the
//! buffer. Clicks are kept as they come. Scroll depth is a running maximum.

use crate::core::buffer::{BoundedBuffer, BufferLimits};
use serde::Serialize;

/// A kept pointer position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MouseSample {
    pub x: f64,
    pub y: f64,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClickSample {
    pub x: f64,
    pub y: f64,
    pub element: String,
    pub timestamp: i64,
}

/// A generic interaction, including custom events from the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    pub timestamp: i64,
}

/// Behavioral state for one activation period.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBehavior {
    pub mouse_movements: BoundedBuffer<MouseSample>,
    pub clicks: BoundedBuffer<ClickSample>,
    /// Deepest scroll position seen, 0-100
    pub scroll_depth: u8,
    /// Seconds since activation
    pub time_on_page: u64,
    pub interactions: BoundedBuffer<Interaction>,
}

impl UserBehavior {
    pub fn new(limits: &BufferLimits) -> Self {
        Self {
            mouse_movements: BoundedBuffer::new(limits.mouse_movements),
            clicks: BoundedBuffer::new(limits.clicks),
            scroll_depth: 0,
            time_on_page: 0,
            interactions: BoundedBuffer::new(limits.interactions),
        }
    }

    /// Total buffered samples across the behavior lists.
    pub fn sample_count(&self) -> usize {
        self.mouse_movements.len() + self.clicks.len() + self.interactions.len()
    }
}

/// Writes host events into a [`UserBehavior`].
#[derive(Debug, Clone)]
pub struct BehaviorRecorder {
    behavior: UserBehavior,
    sample_interval_ms: u64,
    last_mouse_sample_ms: Option<u64>,
}

impl BehaviorRecorder {
    pub fn new(limits: &BufferLimits, sample_interval_ms: u64) -> Self {
        Self {
            behavior: UserBehavior::new(limits),
            sample_interval_ms,
            last_mouse_sample_ms: None,
        }
    }

    pub fn behavior(&self) -> &UserBehavior {
        &self.behavior
    }

    /// Record a pointer move if the sample interval has elapsed.
    ///
    /// Returns `false` when the move was throttled.
    pub fn record_mouse_move(&mut self, x: f64, y: f64, now_ms: u64, timestamp: i64) -> bool {
        if let Some(last) = self.last_mouse_sample_ms {
            if now_ms.saturating_sub(last) < self.sample_interval_ms {
                return false;
            }
        }
        self.last_mouse_sample_ms = Some(now_ms);
        self.behavior
            .mouse_movements
            .push(MouseSample { x, y, timestamp });
        true
    }

    pub fn record_click(&mut self, x: f64, y: f64, element: &str, timestamp: i64) {
        self.behavior.clicks.push(ClickSample {
            x,
            y,
            element: element.to_string(),
            timestamp,
        });
    }

    /// Raise the scroll depth; lower readings are ignored.
    pub fn record_scroll_depth(&mut self, depth: u8) {
        let depth = depth.min(100);
        if depth > self.behavior.scroll_depth {
            self.behavior.scroll_depth = depth;
        }
    }

    pub fn record_interaction(
        &mut self,
        kind: &str,
        target: &str,
        properties: Option<serde_json::Value>,
        timestamp: i64,
    ) {
        self.behavior.interactions.push(Interaction {
            kind: kind.to_string(),
            target: target.to_string(),
            properties,
            timestamp,
        });
    }

    /// Recompute time on page from the activation instant.
    pub fn update_time_on_page(&mut self, activated_at_ms: u64, now_ms: u64) {
        let secs = now_ms.saturating_sub(activated_at_ms) / 1000;
        // Monotonic even if a stale tick lands late.
        self.behavior.time_on_page = self.behavior.time_on_page.max(secs);
    }
}
