//! Fare persistence on top of a durable key-value store.
//!
//! Resolved fares are stored under `fare:<sha256 of canonical key>` with a
//! 30 minute lifetime; confirmed fares under `validated:<vehicle>:<trip type>`
//! with no expiry. Expired fares are swept at most once per lifetime, on the
//! next write.

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::FareError;
use crate::fare::key::CanonicalKey;
use crate::fare::normalize::normalize_vehicle_id;
use crate::fare::types::{CacheEntry, TripType, ValidatedFare, VehicleClass};
use crate::fare::validator::FareValidator;

use super::storage::KeyValueStore;

const FARE_PREFIX: &str = "fare:";
const VALIDATED_PREFIX: &str = "validated:";

fn storage_error(e: color_eyre::Report) -> FareError {
  FareError::Storage(e.to_string())
}

/// Persists resolved and validated fares.
pub struct DurableFareStore {
  store: Arc<dyn KeyValueStore>,
  ttl: Duration,
  validator: FareValidator,
  clock: Clock,
  last_sweep: Mutex<Option<Instant>>,
}

impl DurableFareStore {
  pub fn new(
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    validator: FareValidator,
    clock: Clock,
  ) -> Self {
    Self {
      store,
      ttl,
      validator,
      clock,
      last_sweep: Mutex::new(None),
    }
  }

  fn fare_key(key: &CanonicalKey) -> String {
    format!("{}{}", FARE_PREFIX, key.storage_hash())
  }

  fn validated_key(vehicle_id: &str, trip_type: TripType) -> String {
    format!(
      "{}{}:{}",
      VALIDATED_PREFIX,
      normalize_vehicle_id(vehicle_id),
      trip_type
    )
  }

  fn read<T: DeserializeOwned>(&self, storage_key: &str) -> Result<Option<T>, FareError> {
    let Some(raw) = self.store.get(storage_key).map_err(storage_error)? else {
      return Ok(None);
    };

    match serde_json::from_str(&raw) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        warn!(storage_key, error = %e, "Dropping unreadable durable fare");
        self.store.remove(storage_key).map_err(storage_error)?;
        Ok(None)
      }
    }
  }

  fn write<T: Serialize>(&self, storage_key: &str, value: &T) -> Result<(), FareError> {
    let raw = serde_json::to_string(value)
      .map_err(|e| FareError::Storage(format!("Failed to serialize fare: {}", e)))?;
    self.store.set(storage_key, &raw).map_err(storage_error)
  }

  /// Fresh, valid entry for `key`. Expired or invalid entries are removed.
  pub fn get_fare(&self, key: &CanonicalKey) -> Result<Option<CacheEntry>, FareError> {
    let storage_key = Self::fare_key(key);
    let Some(entry) = self.read::<CacheEntry>(&storage_key)? else {
      return Ok(None);
    };

    if entry.key != *key {
      return Ok(None);
    }

    if entry.is_expired_at(self.clock.now()) {
      debug!(key = %key, "Durable fare expired");
      self.store.remove(&storage_key).map_err(storage_error)?;
      return Ok(None);
    }

    if !self.is_plausible(&entry) {
      warn!(key = %key, fare = entry.fare, "Dropping durable fare that fails validation");
      self.store.remove(&storage_key).map_err(storage_error)?;
      return Ok(None);
    }

    Ok(Some(entry))
  }

  fn is_plausible(&self, entry: &CacheEntry) -> bool {
    self.validator.is_valid(
      f64::from(entry.fare),
      entry.key.vehicle_class(),
      entry.key.trip_type,
      entry.key.distance_km(),
    )
  }

  /// Persist an entry, re-timed to the durable lifetime from its creation.
  pub fn store_fare(&self, entry: &CacheEntry) -> Result<(), FareError> {
    self.validator.check(
      f64::from(entry.fare),
      entry.key.vehicle_class(),
      entry.key.trip_type,
      entry.key.distance_km(),
    )?;

    let stored = CacheEntry {
      expires_at: entry.created_at + self.ttl,
      ..entry.clone()
    };
    self.write(&Self::fare_key(&entry.key), &stored)?;

    if let Err(e) = self.sweep_if_due() {
      warn!(error = %e, "Durable fare sweep failed");
    }
    Ok(())
  }

  fn sweep_if_due(&self) -> Result<(), FareError> {
    let interval = self.ttl.to_std().unwrap_or_default();
    {
      let mut last_sweep = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
      if last_sweep.is_some_and(|at| at.elapsed() < interval) {
        return Ok(());
      }
      *last_sweep = Some(Instant::now());
    }
    self.purge_expired().map(|_| ())
  }

  /// Remove expired, unreadable and implausible fares. Returns how many
  /// were removed.
  pub fn purge_expired(&self) -> Result<usize, FareError> {
    let now = self.clock.now();
    let mut removed = 0;

    for storage_key in self.store.keys_with_prefix(FARE_PREFIX).map_err(storage_error)? {
      let Some(raw) = self.store.get(&storage_key).map_err(storage_error)? else {
        continue;
      };
      let keep = serde_json::from_str::<CacheEntry>(&raw)
        .map(|entry| !entry.is_expired_at(now) && self.is_plausible(&entry))
        .unwrap_or(false);
      if !keep {
        self.store.remove(&storage_key).map_err(storage_error)?;
        removed += 1;
      }
    }

    if removed > 0 {
      debug!(removed, "Swept durable fares");
    }
    Ok(removed)
  }

  pub fn get_validated(
    &self,
    vehicle_id: &str,
    trip_type: TripType,
  ) -> Result<Option<ValidatedFare>, FareError> {
    self.read(&Self::validated_key(vehicle_id, trip_type))
  }

  pub fn store_validated(&self, fare: &ValidatedFare) -> Result<(), FareError> {
    self.validator.check(
      f64::from(fare.fare),
      VehicleClass::from_vehicle_id(&normalize_vehicle_id(&fare.vehicle_id)),
      fare.trip_type,
      fare.distance_km,
    )?;
    self.write(&Self::validated_key(&fare.vehicle_id, fare.trip_type), fare)
  }

  pub fn remove_validated(&self, vehicle_id: &str, trip_type: TripType) -> Result<(), FareError> {
    self
      .store
      .remove(&Self::validated_key(vehicle_id, trip_type))
      .map_err(storage_error)
  }

  /// Remove every fare and validated fare. Returns how many keys were removed.
  pub fn clear(&self) -> Result<usize, FareError> {
    let mut removed = 0;
    for prefix in [FARE_PREFIX, VALIDATED_PREFIX] {
      for key in self.store.keys_with_prefix(prefix).map_err(storage_error)? {
        self.store.remove(&key).map_err(storage_error)?;
        removed += 1;
      }
    }
    Ok(removed)
  }
}
