//! Canonical cache keys for fare requests.

use chrono::{FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::FareError;

use super::normalize::{normalize_package_id, normalize_vehicle_id};
use super::types::{FareRequest, TripMode, TripType, VehicleClass};

/// Width of a distance bucket in km.
const DISTANCE_BUCKET_KM: f64 = 10.0;

/// Night runs from 22:00 up to (not including) 06:00 local time.
const NIGHT_START_HOUR: u32 = 22;
const NIGHT_END_HOUR: u32 = 6;

/// The cacheable identity of a fare request.
///
/// Requests that differ only within one distance bucket and day/night half
/// map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalKey {
  pub vehicle_id: String,
  pub package_id: Option<String>,
  pub trip_type: TripType,
  pub trip_mode: TripMode,
  pub distance_bucket_km: u32,
  pub night: bool,
}

impl CanonicalKey {
  /// Build the key for a request, reading local time at `offset`.
  pub fn from_request(request: &FareRequest, offset: FixedOffset) -> Result<Self, FareError> {
    let vehicle_id = normalize_vehicle_id(&request.vehicle_id);
    if vehicle_id.is_empty() {
      return Err(FareError::MalformedRequest("vehicle id is empty".to_string()));
    }
    if !request.distance_km.is_finite() || request.distance_km < 0.0 {
      return Err(FareError::MalformedRequest(format!(
        "distance {} is not a usable number of km",
        request.distance_km
      )));
    }

    let package_id = match request.trip_type {
      TripType::Local => Some(normalize_package_id(request.package.as_deref().unwrap_or_default())),
      _ => None,
    };

    let night = request
      .pickup_at
      .map(|at| {
        let hour = at.with_timezone(&offset).hour();
        hour >= NIGHT_START_HOUR || hour < NIGHT_END_HOUR
      })
      .unwrap_or(false);

    Ok(Self {
      vehicle_id,
      package_id,
      trip_type: request.trip_type,
      trip_mode: request.trip_mode,
      distance_bucket_km: distance_bucket(request.distance_km),
      night,
    })
  }

  pub fn vehicle_class(&self) -> VehicleClass {
    VehicleClass::from_vehicle_id(&self.vehicle_id)
  }

  /// Bucketed distance, the distance fares under this key are checked against.
  pub fn distance_km(&self) -> f64 {
    f64::from(self.distance_bucket_km)
  }

  /// Key without the distance bucket and night flag; remote fetches are
  /// throttled per family.
  pub fn family(&self) -> String {
    format!(
      "{}:{}:{}:{}",
      self.vehicle_id,
      self.package_id.as_deref().unwrap_or("-"),
      self.trip_type,
      self.trip_mode
    )
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn storage_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for CanonicalKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}km:{}",
      self.family(),
      self.distance_bucket_km,
      if self.night { "night" } else { "day" }
    )
  }
}

/// Round a distance to the nearest bucket.
fn distance_bucket(distance_km: f64) -> u32 {
  ((distance_km / DISTANCE_BUCKET_KM).round() * DISTANCE_BUCKET_KM) as u32
}
