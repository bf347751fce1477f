//! Fire-and-forget delivery of flush payloads.
//!
//! A flush hands its payload to a [`TelemetrySink`] and moves on; nothing
//! is awaited and no acknowledgment comes back. [`Transport`] prefers the
//! beacon path and falls back to a keep-alive request when no beacon is
//! available or the beacon refuses to queue.

use crate::core::TelemetryPayload;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// One-way payload sink.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, payload: &TelemetryPayload);
}

/// Queue-and-forget sender that survives page teardown.
pub trait BeaconSender: Send + Sync {
    /// Returns `false` if the beacon could not be queued.
    fn send_beacon(&self, url: &str, body: String) -> bool;
}

/// Detached request that is allowed to outlive the caller.
pub trait KeepAliveSender: Send + Sync {
    fn send_keepalive(&self, url: &str, body: String);
}

/// Transport errors. Only construction can fail; delivery never reports.
#[derive(Debug)]
pub enum TransportError {
    Client(String),
    Runtime(String),
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Client(msg) => write!(f, "HTTP client error: {msg}"),
            TransportError::Runtime(msg) => write!(f, "Transport runtime error: {msg}"),
            TransportError::Io(msg) => write!(f, "Transport IO error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Beacon-first sink with a keep-alive fallback.
pub struct Transport {
    endpoint: String,
    beacon: Option<Arc<dyn BeaconSender>>,
    fallback: Arc<dyn KeepAliveSender>,
}

impl Transport {
    pub fn new(
        endpoint: impl Into<String>,
        beacon: Option<Arc<dyn BeaconSender>>,
        fallback: Arc<dyn KeepAliveSender>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            beacon,
            fallback,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver an already serialized body.
    pub fn deliver(&self, body: String) {
        if let Some(beacon) = &self.beacon {
            if beacon.send_beacon(&self.endpoint, body.clone()) {
                return;
            }
            tracing::debug!("Beacon refused payload, falling back to keep-alive request");
        }
        self.fallback.send_keepalive(&self.endpoint, body);
    }
}

impl TelemetrySink for Transport {
    fn send(&self, payload: &TelemetryPayload) {
        match payload.to_json() {
            Ok(body) => self.deliver(body),
            Err(e) => crate::dev_warn!("Could not serialize telemetry payload: {e}"),
        }
    }
}

/// Appends every payload as one JSON line to a file.
pub struct JsonlSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Result<Self, TransportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransportError::Io(e.to_string()))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| std::io::Error::other("export lock poisoned"))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl TelemetrySink for JsonlSink {
    fn send(&self, payload: &TelemetryPayload) {
        let line = match payload.to_json() {
            Ok(line) => line,
            Err(e) => {
                crate::dev_warn!("Could not serialize telemetry payload: {e}");
                return;
            }
        };
        if let Err(e) = self.append(&line) {
            crate::dev_warn!("Could not export payload to {:?}: {e}", self.path);
        }
    }
}

/// Keeps payloads in memory. Useful for hosts that batch elsewhere.
#[derive(Default)]
pub struct MemorySink {
    payloads: Mutex<Vec<TelemetryPayload>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<TelemetryPayload> {
        self.payloads
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemorySink {
    fn send(&self, payload: &TelemetryPayload) {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.clone());
        }
    }
}

#[cfg(feature = "http")]
pub use http::{BeaconDispatcher, KeepAliveSink};

#[cfg(feature = "http")]
mod http {
    use super::{BeaconSender, KeepAliveSender, TransportError};
    use crossbeam_channel::{bounded, Sender, TrySendError};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    fn build_client() -> Result<reqwest::Client, TransportError> {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn post_json(client: &reqwest::Client, url: &str, body: String) {
        let result = client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                crate::dev_warn!("Collection endpoint returned {}", response.status());
            }
            Ok(_) => {}
            Err(e) => crate::dev_warn!("Telemetry delivery failed: {e}"),
        }
    }

    struct Beacon {
        url: String,
        body: String,
    }

    /// Background beacon queue.
    ///
    /// Beacons are queued on a bounded channel and posted by a dedicated
    /// thread, so callers never block. Dropping the dispatcher closes the
    /// queue and waits for already queued beacons to go out.
    pub struct BeaconDispatcher {
        sender: Option<Sender<Beacon>>,
        thread_handle: Option<JoinHandle<()>>,
    }

    impl BeaconDispatcher {
        pub fn new(queue_capacity: usize) -> Result<Self, TransportError> {
            let client = build_client()?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| TransportError::Runtime(format!("Failed to create runtime: {e}")))?;

            let (sender, receiver) = bounded::<Beacon>(queue_capacity);
            let handle = thread::Builder::new()
                .name("telemetry-beacon".to_string())
                .spawn(move || {
                    for beacon in receiver.iter() {
                        runtime.block_on(post_json(&client, &beacon.url, beacon.body));
                    }
                })
                .map_err(|e| TransportError::Runtime(e.to_string()))?;

            Ok(Self {
                sender: Some(sender),
                thread_handle: Some(handle),
            })
        }

        /// Stop accepting beacons and wait for the queue to drain.
        pub fn close(&mut self) {
            self.sender.take();
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }

    impl BeaconSender for BeaconDispatcher {
        fn send_beacon(&self, url: &str, body: String) -> bool {
            let Some(sender) = &self.sender else {
                return false;
            };
            match sender.try_send(Beacon {
                url: url.to_string(),
                body,
            }) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Beacon queue full");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        }
    }

    impl Drop for BeaconDispatcher {
        fn drop(&mut self) {
            self.close();
        }
    }

    /// Detached POSTs on the caller's tokio runtime.
    pub struct KeepAliveSink {
        client: reqwest::Client,
    }

    impl KeepAliveSink {
        pub fn new() -> Result<Self, TransportError> {
            Ok(Self {
                client: build_client()?,
            })
        }
    }

    impl KeepAliveSender for KeepAliveSink {
        fn send_keepalive(&self, url: &str, body: String) {
            let handle = match tokio::runtime::Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => {
                    crate::dev_warn!("No async runtime available for keep-alive request");
                    return;
                }
            };
            let client = self.client.clone();
            let url = url.to_string();
            handle.spawn(async move {
                post_json(&client, &url, body).await;
            });
        }
    }
}
