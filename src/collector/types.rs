//! Page event types delivered by the host to the collector.
//!
//! These are the raw signals a page session produces. The collector decides
//! which of them become buffered samples.

use serde::{Deserialize, Serialize};

/// A single event raised by the host page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    /// Pointer moved to a viewport position
    MouseMove { x: f64, y: f64 },
    /// Pointer click on an element
    Click {
        x: f64,
        y: f64,
        /// Tag name or short selector of the click target
        element: String,
    },
    /// Document scrolled
    Scroll {
        scroll_top: f64,
        viewport_height: f64,
        document_height: f64,
    },
    /// Uncaught exception in the host page
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    /// Promise rejection nobody handled
    UnhandledRejection { reason: String },
    /// The page is being torn down
    Unload,
}

impl PageEvent {
    /// Short name used in trace logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PageEvent::MouseMove { .. } => "mouse_move",
            PageEvent::Click { .. } => "click",
            PageEvent::Scroll { .. } => "scroll",
            PageEvent::Error { .. } => "error",
            PageEvent::UnhandledRejection { .. } => "unhandled_rejection",
            PageEvent::Unload => "unload",
        }
    }
}

/// Compute the visible scroll depth as a percentage of the document.
///
/// A document with no measurable height is fully visible.
pub fn scroll_depth_percent(scroll_top: f64, viewport_height: f64, document_height: f64) -> u8 {
    if document_height <= 0.0 || !document_height.is_finite() {
        return 100;
    }
    let seen = (scroll_top.max(0.0) + viewport_height.max(0.0)) / document_height * 100.0;
    if !seen.is_finite() {
        return 0;
    }
    seen.round().clamp(0.0, 100.0) as u8
}
