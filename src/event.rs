//! Process-wide fare notifications.
//!
//! Consumers subscribe to `fare-updated` to pick up fares resolved elsewhere
//! and to `cache-cleared` to re-resolve after a global clear. Every publish is
//! counted per event name; beyond the window cap, publishes are dropped so
//! listeners that re-trigger the same event cannot loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, trace};

use crate::fare::types::FareSource;
use crate::throttle::ThrottleGate;

/// Event families carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  FareUpdated,
  CacheCleared,
}

impl EventKind {
  pub fn name(&self) -> &'static str {
    match self {
      EventKind::FareUpdated => "fare-updated",
      EventKind::CacheCleared => "cache-cleared",
    }
  }
}

/// Fare events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum FareEvent {
  /// A fare was resolved and written through the caches
  FareUpdated {
    vehicle_id: String,
    package_id: Option<String>,
    /// Canonical key the fare was stored under
    key: String,
    price: u32,
    source: FareSource,
    timestamp: DateTime<Utc>,
  },
  /// Every cache tier was emptied
  CacheCleared {
    timestamp: DateTime<Utc>,
    force_refresh: bool,
  },
}

impl FareEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      FareEvent::FareUpdated { .. } => EventKind::FareUpdated,
      FareEvent::CacheCleared { .. } => EventKind::CacheCleared,
    }
  }
}

type Handler = Arc<dyn Fn(&FareEvent) + Send + Sync>;

struct BusInner {
  gate: Arc<ThrottleGate>,
  window: Duration,
  max_per_window: u32,
  next_id: AtomicU64,
  handlers: Mutex<HashMap<EventKind, Vec<(u64, Handler)>>>,
}

impl BusInner {
  fn handlers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(u64, Handler)>>> {
    self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn remove(&self, kind: EventKind, id: u64) {
    if let Some(list) = self.handlers().get_mut(&kind) {
      list.retain(|(handler_id, _)| *handler_id != id);
    }
  }
}

/// Typed publish/subscribe with per-event-name rate limiting.
#[derive(Clone)]
pub struct FareEventBus {
  inner: Arc<BusInner>,
}

impl FareEventBus {
  pub fn new(gate: Arc<ThrottleGate>, window: Duration, max_per_window: u32) -> Self {
    Self {
      inner: Arc::new(BusInner {
        gate,
        window,
        max_per_window,
        next_id: AtomicU64::new(1),
        handlers: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Deliver `event` to every subscriber of its kind.
  ///
  /// Returns false if the event was dropped by the rate limit.
  pub fn publish(&self, event: FareEvent) -> bool {
    let kind = event.kind();
    let throttle_key = format!("event:{}", kind.name());

    if !self
      .inner
      .gate
      .allow_in_window(&throttle_key, self.inner.window, self.inner.max_per_window)
    {
      debug!(event = kind.name(), "Dropping event over rate limit");
      return false;
    }

    // Call handlers outside the lock so they may publish or unsubscribe
    let handlers: Vec<Handler> = self
      .inner
      .handlers()
      .get(&kind)
      .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
      .unwrap_or_default();

    trace!(event = kind.name(), subscribers = handlers.len(), "Publishing");
    for handler in handlers {
      handler(&event);
    }
    true
  }

  /// Register a handler. It stays registered while the returned
  /// `Subscription` is alive.
  pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
  where
    F: Fn(&FareEvent) + Send + Sync + 'static,
  {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .inner
      .handlers()
      .entry(kind)
      .or_default()
      .push((id, Arc::new(handler)));

    Subscription {
      bus: Arc::downgrade(&self.inner),
      kind,
      id,
    }
  }

  pub fn subscriber_count(&self, kind: EventKind) -> usize {
    self.inner.handlers().get(&kind).map_or(0, Vec::len)
  }
}

/// Handle returned by `FareEventBus::subscribe`; dropping it unsubscribes.
pub struct Subscription {
  bus: Weak<BusInner>,
  kind: EventKind,
  id: u64,
}

impl Subscription {
  pub fn unsubscribe(self) {
    // Drop does the work
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(bus) = self.bus.upgrade() {
      bus.remove(self.kind, self.id);
    }
  }
}
