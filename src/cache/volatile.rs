//! In-process fare cache, the fastest tier.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::FareError;
use crate::fare::key::CanonicalKey;
use crate::fare::types::CacheEntry;
use crate::fare::validator::FareValidator;

#[derive(Debug, Clone)]
struct Slot {
  entry: CacheEntry,
  stored_at: Instant,
}

/// TTL map from canonical key to resolved fare.
///
/// A slot is fresh while it is younger than the cache TTL and its entry has
/// not reached its own `expires_at`.
#[derive(Debug)]
pub struct VolatileFareCache {
  entries: Mutex<HashMap<CanonicalKey, Slot>>,
  ttl: Duration,
  validator: FareValidator,
  clock: Clock,
}

impl VolatileFareCache {
  pub fn new(ttl: Duration, validator: FareValidator, clock: Clock) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      ttl,
      validator,
      clock,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<CanonicalKey, Slot>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  fn is_fresh(&self, slot: &Slot) -> bool {
    slot.stored_at.elapsed() < self.ttl && !slot.entry.is_expired_at(self.clock.now())
  }

  /// Fresh entry for `key`, dropping it if it has expired.
  pub fn get(&self, key: &CanonicalKey) -> Option<CacheEntry> {
    let mut entries = self.entries();
    let slot = entries.get(key)?;
    if self.is_fresh(slot) {
      return Some(slot.entry.clone());
    }
    entries.remove(key);
    None
  }

  /// Store an entry after validating its fare. Last write wins.
  ///
  /// Expired slots are swept on every insert.
  pub fn insert(&self, entry: CacheEntry) -> Result<(), FareError> {
    self.validator.check(
      f64::from(entry.fare),
      entry.key.vehicle_class(),
      entry.key.trip_type,
      entry.key.distance_km(),
    )?;

    let slot = Slot {
      entry,
      stored_at: Instant::now(),
    };
    self.purge_expired();
    self.entries().insert(slot.entry.key.clone(), slot);
    Ok(())
  }

  pub fn clear(&self) {
    self.entries().clear();
  }

  /// Drop expired entries. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, slot| self.is_fresh(slot));
    before - entries.len()
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
