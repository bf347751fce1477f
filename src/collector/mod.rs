//! Event collection module.
//!
//! Hosts deliver page events through an [`EventSource`]; the collector only
//! ever attaches passive listeners and removes them in full on deactivation.

pub mod source;
pub mod types;

// Re-export commonly used types
pub use source::{EventBus, EventHandler, EventSource, Subscription};
pub use types::{scroll_depth_percent, PageEvent};
