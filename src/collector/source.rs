//! Event source capability and the in-process event bus.
//!
//! Listeners are registered through [`EventSource::subscribe`] and removed by
//! cancelling (or dropping) the returned [`Subscription`]. Removal is
//! synchronous: once `cancel` returns, the handler is never invoked again by
//! a dispatch that starts afterwards.

use crate::collector::types::PageEvent;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Callback invoked for every event a source emits.
pub type EventHandler = Arc<dyn Fn(&PageEvent) + Send + Sync>;

/// Handle that keeps a registration alive. Dropping it unregisters.
#[must_use = "dropping a Subscription unregisters it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap an unregister action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to undo.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Unregister now.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Anything that can deliver page events to passive listeners.
pub trait EventSource: Send + Sync {
    fn subscribe(&self, handler: EventHandler) -> Subscription;
}

/// In-process fan-out event source.
///
/// Hosts push events with [`EventBus::emit`]; every handler registered at
/// dispatch time receives them in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: Mutex<BTreeMap<u64, EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to all current listeners.
    pub fn emit(&self, event: &PageEvent) {
        // Snapshot so handlers may unsubscribe while being called.
        let handlers: Vec<EventHandler> = match self.inner.handlers.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.handlers.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl EventSource for EventBus {
    fn subscribe(&self, handler: EventHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.inner.handlers.lock() {
            map.insert(id, handler);
        }
        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                if let Ok(mut map) = inner.handlers.lock() {
                    map.remove(&id);
                }
            }
        })
    }
}
