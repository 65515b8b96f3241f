//! Error taxonomy for fare resolution.

use thiserror::Error;

use crate::fare::types::{TripType, VehicleClass};

/// Errors produced while resolving a fare.
///
/// Only `MalformedRequest` and `Configuration` ever reach a caller of
/// `FareResolver::resolve`; the rest are recovered inside the cascade.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FareError {
  #[error("malformed fare request: {0}")]
  MalformedRequest(String),

  #[error("fallback table misconfigured: {0}")]
  Configuration(String),

  #[error("fare gateway failed: {0}")]
  Gateway(String),

  #[error("fare gateway timed out after {0}ms")]
  Timeout(u64),

  #[error("fare {fare} rejected for {class} {trip_type}")]
  Validation {
    fare: f64,
    class: VehicleClass,
    trip_type: TripType,
  },

  #[error("fare storage error: {0}")]
  Storage(String),

  #[error("fare resolution aborted: {0}")]
  Aborted(String),
}

impl FareError {
  /// Whether the cascade recovers from this error on its own.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      FareError::Gateway(_) | FareError::Timeout(_) | FareError::Validation { .. } | FareError::Storage(_)
    )
  }
}
