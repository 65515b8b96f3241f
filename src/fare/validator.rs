//! Sanity bounds for fares before they are allowed into any cache tier.

use crate::error::FareError;

use super::types::{TripType, VehicleClass};

/// Inclusive plausibility band for one trip type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareBand {
  pub floor: f64,
  pub ceiling: f64,
  /// Ceiling used for tempo travellers and luxury cars.
  pub premium_ceiling: f64,
  /// Headroom added to the ceiling for every km of trip distance.
  pub per_km_headroom: f64,
}

impl FareBand {
  fn ceiling_for(&self, class: VehicleClass, distance_km: f64) -> f64 {
    let fixed = if class.is_premium() {
      self.premium_ceiling
    } else {
      self.ceiling
    };
    fixed + self.per_km_headroom * distance_km.max(0.0)
  }
}

/// Checks fares against per-trip-type bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareValidator {
  local: FareBand,
  airport: FareBand,
  outstation: FareBand,
}

impl Default for FareValidator {
  fn default() -> Self {
    Self {
      local: FareBand {
        floor: 500.0,
        ceiling: 15_000.0,
        premium_ceiling: 20_000.0,
        per_km_headroom: 0.0,
      },
      airport: FareBand {
        floor: 300.0,
        ceiling: 20_000.0,
        premium_ceiling: 20_000.0,
        per_km_headroom: 50.0,
      },
      // Outstation trips bill both legs, so the headroom covers twice the
      // steepest per-km rate
      outstation: FareBand {
        floor: 1_000.0,
        ceiling: 200_000.0,
        premium_ceiling: 200_000.0,
        per_km_headroom: 100.0,
      },
    }
  }
}

impl FareValidator {
  fn band(&self, trip_type: TripType) -> &FareBand {
    match trip_type {
      TripType::Local => &self.local,
      TripType::Airport => &self.airport,
      TripType::Outstation | TripType::Tour => &self.outstation,
    }
  }

  /// Whether `fare` is plausible for a trip of `distance_km`.
  ///
  /// Local packages ignore the distance.
  pub fn is_valid(
    &self,
    fare: f64,
    class: VehicleClass,
    trip_type: TripType,
    distance_km: f64,
  ) -> bool {
    if !fare.is_finite() || fare <= 0.0 {
      return false;
    }
    let band = self.band(trip_type);
    fare >= band.floor && fare <= band.ceiling_for(class, distance_km)
  }

  pub fn check(
    &self,
    fare: f64,
    class: VehicleClass,
    trip_type: TripType,
    distance_km: f64,
  ) -> Result<(), FareError> {
    if self.is_valid(fare, class, trip_type, distance_km) {
      Ok(())
    } else {
      Err(FareError::Validation {
        fare,
        class,
        trip_type,
      })
    }
  }

  /// Validate a raw amount and round it up to the nearest 10.
  ///
  /// The rounded value is checked again; bands need not be multiples of 10.
  pub fn accept(
    &self,
    raw: f64,
    class: VehicleClass,
    trip_type: TripType,
    distance_km: f64,
  ) -> Option<u32> {
    if !self.is_valid(raw, class, trip_type, distance_km) {
      return None;
    }
    let rounded = round_up_to_ten(raw);
    self
      .is_valid(f64::from(rounded), class, trip_type, distance_km)
      .then_some(rounded)
  }
}

/// Fares are whole currency units rounded up to the nearest 10.
///
/// Amounts are first settled to two decimals so float noise from rate
/// discounts does not bump a fare into the next step.
pub fn round_up_to_ten(raw: f64) -> u32 {
  let settled = (raw * 100.0).round() / 100.0;
  ((settled / 10.0).ceil() * 10.0) as u32
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rejects_nonsense_values() {
    let validator = FareValidator::default();
    for fare in [0.0, -100.0, f64::NAN, f64::INFINITY] {
      assert!(!validator.is_valid(fare, VehicleClass::Sedan, TripType::Local, 0.0));
    }
  }

  #[test]
  fn test_band_depends_on_trip_type_and_class() {
    let validator = FareValidator::default();
    assert!(!validator.is_valid(400.0, VehicleClass::Sedan, TripType::Local, 0.0));
    assert!(validator.is_valid(400.0, VehicleClass::Sedan, TripType::Airport, 5.0));
    assert!(!validator.is_valid(18_000.0, VehicleClass::Sedan, TripType::Local, 0.0));
    assert!(validator.is_valid(18_000.0, VehicleClass::Luxury, TripType::Local, 0.0));
  }

  #[test]
  fn test_ceiling_grows_with_distance() {
    let validator = FareValidator::default();

    assert!(!validator.is_valid(20_300.0, VehicleClass::Luxury, TripType::Airport, 0.0));
    assert!(validator.is_valid(20_300.0, VehicleClass::Luxury, TripType::Airport, 460.0));
    assert!(validator.is_valid(206_100.0, VehicleClass::Luxury, TripType::Outstation, 3200.0));
    assert!(validator.is_valid(201_850.0, VehicleClass::Sedan, TripType::Tour, 7200.0));

    // Distance never makes an absurd amount plausible
    assert!(!validator.is_valid(5_000_000.0, VehicleClass::Sedan, TripType::Outstation, 200.0));
    assert!(!validator.is_valid(60_000.0, VehicleClass::Sedan, TripType::Airport, 35.0));
    // Nor does it lift local packages
    assert!(!validator.is_valid(18_000.0, VehicleClass::Sedan, TripType::Local, 500.0));
  }

  #[test]
  fn test_check_reports_validation_error() {
    let validator = FareValidator::default();
    let err = validator
      .check(10.0, VehicleClass::Ertiga, TripType::Outstation, 100.0)
      .unwrap_err();
    assert!(matches!(err, FareError::Validation { .. }));
  }

  #[test]
  fn test_accept_rounds_up() {
    let validator = FareValidator::default();
    assert_eq!(validator.accept(2401.0, VehicleClass::Sedan, TripType::Local, 0.0), Some(2410));
    assert_eq!(validator.accept(2400.0, VehicleClass::Sedan, TripType::Local, 0.0), Some(2400));
    assert_eq!(validator.accept(14_995.0, VehicleClass::Sedan, TripType::Local, 0.0), Some(15_000));
    assert_eq!(validator.accept(15_000.5, VehicleClass::Sedan, TripType::Local, 0.0), None);
  }
}
