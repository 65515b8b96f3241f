//! Core fare types shared by every tier of the cascade.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::key::CanonicalKey;

/// Kind of trip being priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripType {
  Outstation,
  Local,
  Airport,
  Tour,
}

impl TripType {
  pub fn as_str(&self) -> &'static str {
    match self {
      TripType::Outstation => "outstation",
      TripType::Local => "local",
      TripType::Airport => "airport",
      TripType::Tour => "tour",
    }
  }
}

impl fmt::Display for TripType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TripType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "outstation" => Ok(TripType::Outstation),
      "local" => Ok(TripType::Local),
      "airport" => Ok(TripType::Airport),
      "tour" => Ok(TripType::Tour),
      other => Err(format!("unknown trip type '{}'", other)),
    }
  }
}

/// One-way or round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripMode {
  #[default]
  OneWay,
  RoundTrip,
}

impl TripMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      TripMode::OneWay => "one-way",
      TripMode::RoundTrip => "round-trip",
    }
  }
}

impl fmt::Display for TripMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TripMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().replace('_', "-").as_str() {
      "one-way" | "oneway" => Ok(TripMode::OneWay),
      "round-trip" | "roundtrip" => Ok(TripMode::RoundTrip),
      other => Err(format!("unknown trip mode '{}'", other)),
    }
  }
}

/// Pricing class a normalized vehicle id falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
  Sedan,
  Ertiga,
  InnovaCrysta,
  InnovaHycross,
  TempoTraveller,
  Luxury,
}

impl VehicleClass {
  pub const ALL: [VehicleClass; 6] = [
    VehicleClass::Sedan,
    VehicleClass::Ertiga,
    VehicleClass::InnovaCrysta,
    VehicleClass::InnovaHycross,
    VehicleClass::TempoTraveller,
    VehicleClass::Luxury,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      VehicleClass::Sedan => "sedan",
      VehicleClass::Ertiga => "ertiga",
      VehicleClass::InnovaCrysta => "innova_crysta",
      VehicleClass::InnovaHycross => "innova_hycross",
      VehicleClass::TempoTraveller => "tempo_traveller",
      VehicleClass::Luxury => "luxury",
    }
  }

  /// Match a normalized vehicle id against the known classes by substring.
  ///
  /// Ids that match nothing are priced as sedans.
  pub fn from_vehicle_id(vehicle_id: &str) -> Self {
    Self::ALL
      .into_iter()
      .find(|class| vehicle_id.contains(class.as_str()))
      .unwrap_or(VehicleClass::Sedan)
  }

  /// Heavy vehicles get a higher plausibility ceiling.
  pub fn is_premium(&self) -> bool {
    matches!(self, VehicleClass::TempoTraveller | VehicleClass::Luxury)
  }
}

impl fmt::Display for VehicleClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A request to price one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareRequest {
  pub vehicle_id: String,
  pub distance_km: f64,
  pub trip_type: TripType,
  #[serde(default)]
  pub trip_mode: TripMode,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub pickup_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub return_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub force_refresh: bool,
}

impl FareRequest {
  pub fn new(vehicle_id: impl Into<String>, trip_type: TripType, distance_km: f64) -> Self {
    Self {
      vehicle_id: vehicle_id.into(),
      distance_km,
      trip_type,
      trip_mode: TripMode::OneWay,
      package: None,
      pickup_at: None,
      return_at: None,
      force_refresh: false,
    }
  }

  pub fn with_mode(mut self, trip_mode: TripMode) -> Self {
    self.trip_mode = trip_mode;
    self
  }

  pub fn with_package(mut self, package: impl Into<String>) -> Self {
    self.package = Some(package.into());
    self
  }

  pub fn with_pickup(mut self, pickup_at: DateTime<Utc>) -> Self {
    self.pickup_at = Some(pickup_at);
    self
  }

  pub fn with_return(mut self, return_at: DateTime<Utc>) -> Self {
    self.return_at = Some(return_at);
    self
  }

  pub fn forced(mut self) -> Self {
    self.force_refresh = true;
    self
  }
}

/// Which tier produced a cached fare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FareSource {
  Validated,
  Remote,
  ComputedFallback,
  DurableRestore,
}

impl FareSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      FareSource::Validated => "validated",
      FareSource::Remote => "remote",
      FareSource::ComputedFallback => "computed-fallback",
      FareSource::DurableRestore => "durable-restore",
    }
  }
}

impl fmt::Display for FareSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A resolved fare as stored by the volatile and durable tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: CanonicalKey,
  pub fare: u32,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  pub source: FareSource,
}

impl CacheEntry {
  pub fn new(
    key: CanonicalKey,
    fare: u32,
    source: FareSource,
    created_at: DateTime<Utc>,
    ttl: Duration,
  ) -> Self {
    Self {
      key,
      fare,
      created_at,
      expires_at: created_at + ttl,
      source,
    }
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }

  /// Copy of this entry re-labelled for another tier.
  ///
  /// The copy lives at most `ttl` from `now` and never past the original's
  /// own expiry.
  pub fn promoted(&self, source: FareSource, now: DateTime<Utc>, ttl: Duration) -> Self {
    Self {
      source,
      expires_at: self.expires_at.min(now + ttl),
      ..self.clone()
    }
  }
}

/// A fare explicitly confirmed by a booking flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedFare {
  pub vehicle_id: String,
  pub trip_type: TripType,
  pub fare: u32,
  /// Distance of the trip the fare was confirmed for
  #[serde(default)]
  pub distance_km: f64,
  pub confirmed_at: DateTime<Utc>,
}

/// Fare payload returned by the backend, one shape per trip type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trip_type", rename_all = "lowercase")]
pub enum FareDetails {
  Local {
    package_id: String,
    price: f64,
  },
  Airport {
    price: f64,
    tier_price: Option<f64>,
    extra_km_charge: Option<f64>,
    airport_fee: Option<f64>,
  },
  Outstation {
    price: f64,
    base_fare: Option<f64>,
    per_km_rate: Option<f64>,
    driver_allowance: Option<f64>,
  },
}

impl FareDetails {
  pub fn price(&self) -> f64 {
    match self {
      FareDetails::Local { price, .. }
      | FareDetails::Airport { price, .. }
      | FareDetails::Outstation { price, .. } => *price,
    }
  }

  /// Whether this payload can price a trip of the given type.
  ///
  /// Tours are priced with outstation payloads.
  pub fn matches(&self, trip_type: TripType) -> bool {
    matches!(
      (self, trip_type),
      (FareDetails::Local { .. }, TripType::Local)
        | (FareDetails::Airport { .. }, TripType::Airport)
        | (FareDetails::Outstation { .. }, TripType::Outstation | TripType::Tour)
    )
  }
}
