//! Keyed rate limiting for recomputation, refetches and event broadcasts.
//!
//! All state lives for the lifetime of the gate and is only dropped by
//! `reset`. Time is read from `tokio::time::Instant` so paused-clock tests
//! can drive it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Fixed window counter for one key.
#[derive(Debug, Clone, Copy)]
struct Window {
  started_at: Instant,
  count: u32,
}

#[derive(Debug, Default)]
struct GateState {
  last_call: HashMap<String, Instant>,
  windows: HashMap<String, Window>,
  attempts: HashMap<String, u32>,
}

/// Rate limiter keyed by operation name.
#[derive(Debug, Default)]
pub struct ThrottleGate {
  state: Mutex<GateState>,
}

impl ThrottleGate {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> MutexGuard<'_, GateState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Returns true if `key` ran less than `min_interval` ago.
  ///
  /// A call that is not throttled records the current time for `key`.
  pub fn should_throttle(&self, key: &str, min_interval: Duration) -> bool {
    let now = Instant::now();
    let mut state = self.state();

    if let Some(last) = state.last_call.get(key) {
      if now.duration_since(*last) < min_interval {
        trace!(key, "Throttled");
        return true;
      }
    }

    state.last_call.insert(key.to_string(), now);
    false
  }

  /// Count one operation against a fixed window of `window` length.
  ///
  /// Returns false once `max` operations have been counted in the current window.
  pub fn allow_in_window(&self, key: &str, window: Duration, max: u32) -> bool {
    let now = Instant::now();
    let mut state = self.state();

    let entry = state.windows.entry(key.to_string()).or_insert(Window {
      started_at: now,
      count: 0,
    });

    if now.duration_since(entry.started_at) >= window {
      entry.started_at = now;
      entry.count = 0;
    }

    if entry.count >= max {
      trace!(key, count = entry.count, "Window limit reached");
      return false;
    }

    entry.count += 1;
    true
  }

  /// Take one of `max` attempts allowed for `key` until the next reset.
  pub fn take_attempt(&self, key: &str, max: u32) -> bool {
    let mut state = self.state();
    let used = state.attempts.entry(key.to_string()).or_insert(0);
    if *used >= max {
      return false;
    }
    *used += 1;
    true
  }

  /// Attempts used so far for `key`.
  pub fn attempts(&self, key: &str) -> u32 {
    self.state().attempts.get(key).copied().unwrap_or(0)
  }

  /// Forget every key.
  pub fn reset(&self) {
    let mut state = self.state();
    state.last_call.clear();
    state.windows.clear();
    state.attempts.clear();
  }
}
