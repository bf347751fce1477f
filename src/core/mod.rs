//! Core functionality for the telemetry collector.
//!
//! This module contains:
//! - Bounded buffers and the behavior recorder that fills them
//! - Performance sampling and device fingerprinting
//! - Session identity and the flush payload

pub mod behavior;
pub mod buffer;
pub mod clock;
pub mod errors;
pub mod fingerprint;
pub mod page;
pub mod payload;
pub mod performance;
pub mod session;

// Re-export commonly used types
pub use behavior::{BehaviorRecorder, ClickSample, Interaction, MouseSample, UserBehavior};
pub use buffer::{BoundedBuffer, BufferLimits};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::ErrorRecord;
pub use fingerprint::{
    compute_fingerprint, DeviceFingerprint, DeviceProbes, NavigatorFacts, ProbeFuture, ScreenInfo,
};
pub use page::{NetworkInfo, PageContext, PageInfo};
pub use payload::TelemetryPayload;
pub use performance::{
    LcpHandler, NavigationTiming, ObserverError, PaintEntry, PerformanceMetrics,
    PerformanceTimeline, ResourceEntry,
};
pub use session::{FileSessionStorage, MemoryStorage, SessionManager, SessionStorage, StorageError};
