//! Consent state and the publish/subscribe channel that carries it.

use crate::collector::Subscription;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// User consent as recorded by the consent subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentState {
    pub analytics: bool,
    pub version: String,
}

impl ConsentState {
    pub fn granted(version: impl Into<String>) -> Self {
        Self {
            analytics: true,
            version: version.into(),
        }
    }

    pub fn denied(version: impl Into<String>) -> Self {
        Self {
            analytics: false,
            version: version.into(),
        }
    }

    /// Read a consent file. A missing file means no decision yet.
    pub fn load(path: &Path) -> Result<Option<Self>, ConsentError> {
        if !path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConsentError::IoError(e.to_string()))?;
        let state =
            serde_json::from_str(&content).map_err(|e| ConsentError::ParseError(e.to_string()))?;
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConsentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConsentError::IoError(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConsentError::ParseError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConsentError::IoError(e.to_string()))
    }
}

#[derive(Debug)]
pub enum ConsentError {
    IoError(String),
    ParseError(String),
}

impl std::fmt::Display for ConsentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsentError::IoError(e) => write!(f, "Consent IO error: {e}"),
            ConsentError::ParseError(e) => write!(f, "Consent parse error: {e}"),
        }
    }
}

impl std::error::Error for ConsentError {}

/// Callback receiving every published consent state.
pub type ConsentListener = Arc<dyn Fn(Option<&ConsentState>) + Send + Sync>;

/// Source of consent decisions.
pub trait ConsentGateway: Send + Sync {
    fn get_consent(&self) -> Option<ConsentState>;
    fn on_consent_change(&self, listener: ConsentListener) -> Subscription;
}

/// In-process consent publisher.
#[derive(Clone, Default)]
pub struct ConsentChannel {
    inner: Arc<ChannelInner>,
}

#[derive(Default)]
struct ChannelInner {
    current: Mutex<Option<ConsentState>>,
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, ConsentListener>>,
}

impl ConsentChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: Option<ConsentState>) -> Self {
        let channel = Self::new();
        if let Ok(mut current) = channel.inner.current.lock() {
            *current = state;
        }
        channel
    }

    /// Store a new state and notify every listener.
    pub fn publish(&self, state: Option<ConsentState>) {
        if let Ok(mut current) = self.inner.current.lock() {
            *current = state.clone();
        }
        let listeners: Vec<ConsentListener> = match self.inner.listeners.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(state.as_ref());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl ConsentGateway for ConsentChannel {
    fn get_consent(&self) -> Option<ConsentState> {
        self.inner.current.lock().ok().and_then(|c| c.clone())
    }

    fn on_consent_change(&self, listener: ConsentListener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.inner.listeners.lock() {
            map.insert(id, listener);
        }
        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                if let Ok(mut map) = inner.listeners.lock() {
                    map.remove(&id);
                }
            }
        })
    }
}
