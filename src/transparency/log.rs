//! Transparency log of what the collector did.
//!
//! Only counts are kept here, never the collected data itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collection counters for the current process.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Page events accepted into a buffer
    events_recorded: AtomicU64,
    /// Mouse moves dropped by the sampling interval
    samples_throttled: AtomicU64,
    /// Host errors captured
    errors_captured: AtomicU64,
    /// Flushes handed to the sink
    flushes_sent: AtomicU64,
    /// Non-forced flushes dropped by the throttle
    flushes_throttled: AtomicU64,
    /// Transitions into the active state
    activations: AtomicU64,
    /// Log start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            events_recorded: AtomicU64::new(0),
            samples_throttled: AtomicU64::new(0),
            errors_captured: AtomicU64::new(0),
            flushes_sent: AtomicU64::new(0),
            flushes_throttled: AtomicU64::new(0),
            activations: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::debug!("Could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_event(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled_sample(&self) {
        self.samples_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_captured(&self) {
        self.errors_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_sent(&self) {
        self.flushes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_throttled(&self) {
        self.flushes_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            samples_throttled: self.samples_throttled.load(Ordering::Relaxed),
            errors_captured: self.errors_captured.load(Ordering::Relaxed),
            flushes_sent: self.flushes_sent.load(Ordering::Relaxed),
            flushes_throttled: self.flushes_throttled.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Collection Statistics:\n\
             - Events recorded: {}\n\
             - Mouse samples throttled: {}\n\
             - Page errors captured: {}\n\
             - Flushes sent: {}\n\
             - Flushes throttled: {}\n\
             - Activations: {}\n\
             - Running for: {} seconds",
            stats.events_recorded,
            stats.samples_throttled,
            stats.errors_captured,
            stats.flushes_sent,
            stats.flushes_throttled,
            stats.activations,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                events_recorded: stats.events_recorded,
                samples_throttled: stats.samples_throttled,
                errors_captured: stats.errors_captured,
                flushes_sent: stats.flushes_sent,
                flushes_throttled: stats.flushes_throttled,
                activations: stats.activations,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.events_recorded
                    .store(persisted.events_recorded, Ordering::Relaxed);
                self.samples_throttled
                    .store(persisted.samples_throttled, Ordering::Relaxed);
                self.errors_captured
                    .store(persisted.errors_captured, Ordering::Relaxed);
                self.flushes_sent
                    .store(persisted.flushes_sent, Ordering::Relaxed);
                self.flushes_throttled
                    .store(persisted.flushes_throttled, Ordering::Relaxed);
                self.activations
                    .store(persisted.activations, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.events_recorded.store(0, Ordering::Relaxed);
        self.samples_throttled.store(0, Ordering::Relaxed);
        self.errors_captured.store(0, Ordering::Relaxed);
        self.flushes_sent.store(0, Ordering::Relaxed);
        self.flushes_throttled.store(0, Ordering::Relaxed);
        self.activations.store(0, Ordering::Relaxed);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub events_recorded: u64,
    pub samples_throttled: u64,
    pub errors_captured: u64,
    pub flushes_sent: u64,
    pub flushes_throttled: u64,
    pub activations: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    events_recorded: u64,
    samples_throttled: u64,
    errors_captured: u64,
    flushes_sent: u64,
    flushes_throttled: u64,
    activations: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
