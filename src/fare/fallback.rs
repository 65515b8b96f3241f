//! Static default prices, used when no live or cached fare exists.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::error;

use crate::error::FareError;

use super::normalize::{classify_package, HourlyPackage};
use super::types::{TripMode, TripType, VehicleClass};
use super::validator::FareValidator;

const ROUND_TRIP_BASE_DISCOUNT: f64 = 0.90;
const ROUND_TRIP_PER_KM_DISCOUNT: f64 = 0.85;

/// Hourly package prices for local trips.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LocalPackageRates {
  pub four_hours: u32,
  pub eight_hours: u32,
  pub ten_hours: u32,
}

impl LocalPackageRates {
  pub fn price(&self, package: HourlyPackage) -> f64 {
    let price = match package {
      HourlyPackage::FourHours => self.four_hours,
      HourlyPackage::EightHours => self.eight_hours,
      HourlyPackage::TenHours => self.ten_hours,
    };
    f64::from(price)
  }
}

/// Distance-tiered airport transfer prices.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AirportRates {
  /// Up to 10 km
  pub tier1_price: u32,
  /// Up to 20 km
  pub tier2_price: u32,
  /// Up to 30 km; longer trips add `extra_km_charge` per km beyond 30
  pub tier3_price: u32,
  pub extra_km_charge: u32,
  pub airport_fee: u32,
}

impl AirportRates {
  pub fn price(&self, distance_km: f64) -> f64 {
    let tiered = if distance_km <= 10.0 {
      f64::from(self.tier1_price)
    } else if distance_km <= 20.0 {
      f64::from(self.tier2_price)
    } else if distance_km <= 30.0 {
      f64::from(self.tier3_price)
    } else {
      f64::from(self.tier3_price) + (distance_km - 30.0) * f64::from(self.extra_km_charge)
    };
    tiered + f64::from(self.airport_fee)
  }
}

/// Per-km outstation pricing.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct OutstationRates {
  pub base_fare: u32,
  pub per_km_rate: u32,
  pub driver_allowance: u32,
  #[serde(default = "default_minimum_billable_km")]
  pub minimum_billable_km: u32,
  #[serde(default)]
  pub round_trip_base_fare: Option<u32>,
  #[serde(default)]
  pub round_trip_per_km_rate: Option<u32>,
}

fn default_minimum_billable_km() -> u32 {
  300
}

impl OutstationRates {
  /// Price an outstation trip.
  ///
  /// The billed distance is twice the one-way distance in both modes; the
  /// return leg is charged even on one-way trips.
  pub fn price(&self, distance_km: f64, mode: TripMode) -> f64 {
    let (base, per_km) = match mode {
      TripMode::OneWay => (f64::from(self.base_fare), f64::from(self.per_km_rate)),
      TripMode::RoundTrip => (
        self
          .round_trip_base_fare
          .map(f64::from)
          .unwrap_or(f64::from(self.base_fare) * ROUND_TRIP_BASE_DISCOUNT),
        self
          .round_trip_per_km_rate
          .map(f64::from)
          .unwrap_or(f64::from(self.per_km_rate) * ROUND_TRIP_PER_KM_DISCOUNT),
      ),
    };

    let effective_distance = distance_km * 2.0;
    let extra_km = (effective_distance - f64::from(self.minimum_billable_km)).max(0.0);

    base + extra_km * per_km + f64::from(self.driver_allowance)
  }
}

/// All fallback rates for one vehicle class.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct VehicleRates {
  pub local: LocalPackageRates,
  pub airport: AirportRates,
  pub outstation: OutstationRates,
}

impl VehicleRates {
  const fn new(local: [u32; 3], airport: [u32; 5], outstation: [u32; 3]) -> Self {
    Self {
      local: LocalPackageRates {
        four_hours: local[0],
        eight_hours: local[1],
        ten_hours: local[2],
      },
      airport: AirportRates {
        tier1_price: airport[0],
        tier2_price: airport[1],
        tier3_price: airport[2],
        extra_km_charge: airport[3],
        airport_fee: airport[4],
      },
      outstation: OutstationRates {
        base_fare: outstation[0],
        per_km_rate: outstation[1],
        driver_allowance: outstation[2],
        minimum_billable_km: 300,
        round_trip_base_fare: None,
        round_trip_per_km_rate: None,
      },
    }
  }

  pub fn defaults(class: VehicleClass) -> Self {
    match class {
      VehicleClass::Sedan => Self::new([1200, 2400, 3000], [1200, 1800, 2400, 14, 40], [4200, 14, 250]),
      VehicleClass::Ertiga => Self::new([1500, 3000, 3600], [1500, 2200, 2900, 18, 40], [5400, 18, 250]),
      VehicleClass::InnovaCrysta => {
        Self::new([1800, 3600, 4500], [1800, 2600, 3400, 20, 40], [6000, 20, 300])
      }
      VehicleClass::InnovaHycross => {
        Self::new([2000, 4000, 5000], [2000, 2900, 3800, 22, 40], [6500, 22, 300])
      }
      VehicleClass::TempoTraveller => {
        Self::new([3000, 5500, 7000], [3000, 4200, 5500, 28, 40], [9000, 28, 400])
      }
      VehicleClass::Luxury => Self::new([3500, 6500, 8000], [3500, 5000, 6500, 32, 40], [10500, 32, 400]),
    }
  }
}

/// Read-only fallback price table, one row set per vehicle class.
#[derive(Debug, Clone)]
pub struct FallbackPriceTable {
  rates: BTreeMap<VehicleClass, VehicleRates>,
  validator: FareValidator,
}

impl FallbackPriceTable {
  /// Build a table and verify that every row prices to a valid fare.
  pub fn new(
    rates: BTreeMap<VehicleClass, VehicleRates>,
    validator: FareValidator,
  ) -> Result<Self, FareError> {
    let table = Self { rates, validator };
    table.verify()?;
    Ok(table)
  }

  /// Default rates with per-class overrides applied.
  pub fn with_overrides(
    overrides: &BTreeMap<VehicleClass, VehicleRates>,
    validator: FareValidator,
  ) -> Result<Self, FareError> {
    let rates = VehicleClass::ALL
      .into_iter()
      .map(|class| {
        let rates = overrides
          .get(&class)
          .copied()
          .unwrap_or_else(|| VehicleRates::defaults(class));
        (class, rates)
      })
      .collect();
    Self::new(rates, validator)
  }

  pub fn rates(&self, class: VehicleClass) -> Result<&VehicleRates, FareError> {
    self
      .rates
      .get(&class)
      .ok_or_else(|| FareError::Configuration(format!("no fallback rates for {}", class)))
  }

  /// Compute the fallback fare for a normalized vehicle id.
  pub fn compute_fallback(
    &self,
    vehicle_id: &str,
    trip_type: TripType,
    trip_mode: TripMode,
    distance_km: f64,
    package: Option<&str>,
  ) -> Result<u32, FareError> {
    let class = VehicleClass::from_vehicle_id(vehicle_id);
    let rates = self.rates(class)?;

    let raw = match trip_type {
      TripType::Local => {
        let package = package
          .and_then(classify_package)
          .unwrap_or(HourlyPackage::DEFAULT);
        rates.local.price(package)
      }
      TripType::Airport => rates.airport.price(distance_km),
      TripType::Outstation | TripType::Tour => rates.outstation.price(distance_km, trip_mode),
    };

    self.validator.accept(raw, class, trip_type, distance_km).ok_or_else(|| {
      error!(
        vehicle_id,
        %class,
        %trip_type,
        distance_km,
        raw,
        "Fallback table produced an invalid fare"
      );
      FareError::Configuration(format!(
        "fallback fare {} for {} {} at {}km is out of bounds",
        raw, class, trip_type, distance_km
      ))
    })
  }

  /// Price a representative trip for every row.
  ///
  /// The longest samples catch per-km rates steeper than the validator's
  /// distance headroom.
  fn verify(&self) -> Result<(), FareError> {
    const PACKAGES: [&str; 3] = ["4hrs-40km", "8hrs-80km", "10hrs-100km"];
    const AIRPORT_KM: [f64; 5] = [5.0, 15.0, 25.0, 35.0, 500.0];
    const OUTSTATION_KM: [f64; 3] = [50.0, 500.0, 8000.0];

    for class in VehicleClass::ALL {
      let id = class.as_str();
      self.rates(class)?;

      for package in PACKAGES {
        self.compute_fallback(id, TripType::Local, TripMode::OneWay, 0.0, Some(package))?;
      }
      for km in AIRPORT_KM {
        self.compute_fallback(id, TripType::Airport, TripMode::OneWay, km, None)?;
      }
      for km in OUTSTATION_KM {
        for mode in [TripMode::OneWay, TripMode::RoundTrip] {
          self.compute_fallback(id, TripType::Outstation, mode, km, None)?;
        }
      }
    }
    Ok(())
  }
}

impl Default for FallbackPriceTable {
  fn default() -> Self {
    Self {
      rates: VehicleClass::ALL
        .into_iter()
        .map(|class| (class, VehicleRates::defaults(class)))
        .collect(),
      validator: FareValidator::default(),
    }
  }
}
