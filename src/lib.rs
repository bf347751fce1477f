//! Page Telemetry - consent-gated client telemetry collector.
//!
//! This library captures behavioral, performance and device signals from a
//! running page session, keeps them in bounded buffers, and ships them to a
//! collection endpoint on a schedule with best-effort delivery.
//!
//! # Guarantees
//!
//! - **Consent first**: nothing is collected, stored or sent unless analytics
//!   consent is granted and the platform do-not-track signal is off
//! - **Bounded memory**: every buffer is FIFO-trimmed to a fixed capacity
//! - **Never breaks the host**: no collector operation returns an error or
//!   panics into the page; failures are logged in debug builds only
//! - **Hard stop**: revoking consent removes every listener, observer and
//!   timer before returning and deletes the persisted session id
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Telemetry Collector                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐    ┌─────────────┐    ┌──────────────────────┐ │
//! │  │ Consent  │───▶│   Tracker   │───▶│ Behavior / Perf /    │ │
//! │  │ Gateway  │    │ (lifecycle) │    │ Fingerprint buffers  │ │
//! │  └──────────┘    └─────────────┘    └──────────────────────┘ │
//! │                         │                      │             │
//! │                         ▼                      ▼             │
//! │                  ┌─────────────┐      ┌───────────────┐      │
//! │                  │Transparency │      │   Transport   │      │
//! │                  │     Log     │      │ beacon / POST │      │
//! │                  └─────────────┘      └───────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use page_telemetry::collector::EventBus;
//! use page_telemetry::consent::{ConsentChannel, ConsentState};
//! use page_telemetry::core::{MemoryStorage, PageInfo, SystemClock};
//! use page_telemetry::host::{StaticPage, StaticTimeline, SystemProbes};
//! use page_telemetry::transport::MemorySink;
//! use page_telemetry::{Config, Environment, Tracker};
//! use std::sync::Arc;
//!
//! let env = Environment {
//!     events: Arc::new(EventBus::new()),
//!     page: Arc::new(StaticPage::new(PageInfo {
//!         url: "https://app.example/cases".to_string(),
//!         title: "Cases".to_string(),
//!         referrer: None,
//!     })),
//!     timeline: Arc::new(StaticTimeline::new()),
//!     probes: Arc::new(SystemProbes),
//!     storage: Arc::new(MemoryStorage::new()),
//!     sink: Arc::new(MemorySink::new()),
//!     clock: Arc::new(SystemClock::new()),
//! };
//! let consent = ConsentChannel::with_state(Some(ConsentState::granted("1")));
//! let tracker = Tracker::new(Config::default(), env, Arc::new(consent));
//!
//! tracker.initialize();
//! tracker.track_event("case_opened", None);
//! tracker.flush_on_unload();
//! ```

pub mod collector;
pub mod config;
pub mod consent;
pub mod core;
pub mod host;
pub mod tracker;
pub mod transparency;
pub mod transport;

// Re-export key types at crate root for convenience
pub use collector::{EventBus, EventSource, PageEvent, Subscription};
pub use config::{Config, ConfigError};
pub use consent::{ConsentChannel, ConsentGateway, ConsentState};
pub use core::{DeviceFingerprint, TelemetryPayload};
pub use tracker::{Environment, LifecycleState, Tracker};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};
pub use transport::{TelemetrySink, Transport};

#[cfg(feature = "http")]
pub use transport::{BeaconDispatcher, KeepAliveSink};

#[doc(hidden)]
pub use tracing as __tracing;

/// Log a warning in debug builds only.
///
/// Collector failures are never surfaced to the host; in release builds they
/// are silent.
#[macro_export]
macro_rules! dev_warn {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::__tracing::warn!($($arg)*);
        }
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data-collection disclosure that can be displayed to users.
pub const TELEMETRY_DISCLOSURE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              PAGE TELEMETRY - DATA COLLECTION NOTICE             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  Collection only runs with analytics consent, and never while    ║
║  the platform do-not-track signal is set.                        ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE:                                              ║
║    • Pointer positions (sampled) and clicked element names       ║
║    • How far pages are scrolled and how long they stay open      ║
║    • Page load timings and API call durations                    ║
║    • Errors raised by the application                            ║
║    • A device fingerprint (graphics, audio, fonts, screen)       ║
║                                                                  ║
║  ✗ WHAT WE NEVER CAPTURE:                                        ║
║    • Anything typed into forms                                   ║
║    • Page content                                                ║
║    • Anything at all once consent is revoked                     ║
║                                                                  ║
║  Revoking consent discards buffered data and deletes the         ║
║  session identifier.                                             ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    page-telemetry status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
