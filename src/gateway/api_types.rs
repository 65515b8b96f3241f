//! Wire types for the fare API.

use serde::Deserialize;

use crate::fare::normalize::normalize_package_id;
use crate::fare::types::{FareDetails, FareRequest, TripType};

/// Fare payload as the backend sends it. Different endpoints name the
/// total differently and fill in different subsets of the breakdown.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFareResponse {
  #[serde(alias = "fare", alias = "totalPrice", alias = "total_price")]
  pub price: f64,
  #[serde(default, alias = "package_id")]
  pub package_id: Option<String>,
  #[serde(default, alias = "base_fare", alias = "basePrice")]
  pub base_fare: Option<f64>,
  #[serde(default, alias = "per_km_rate", alias = "pricePerKm")]
  pub per_km_rate: Option<f64>,
  #[serde(default, alias = "driver_allowance")]
  pub driver_allowance: Option<f64>,
  #[serde(default, alias = "tier_price")]
  pub tier_price: Option<f64>,
  #[serde(default, alias = "extra_km_charge")]
  pub extra_km_charge: Option<f64>,
  #[serde(default, alias = "airport_fee")]
  pub airport_fee: Option<f64>,
}

/// Some endpoints wrap the payload in `{ "data": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiEnvelope {
  Wrapped { data: ApiFareResponse },
  Bare(ApiFareResponse),
}

impl ApiEnvelope {
  pub fn into_inner(self) -> ApiFareResponse {
    match self {
      ApiEnvelope::Wrapped { data } => data,
      ApiEnvelope::Bare(data) => data,
    }
  }
}

impl ApiFareResponse {
  /// Shape the payload for the request's trip type.
  pub fn into_details(self, request: &FareRequest) -> FareDetails {
    match request.trip_type {
      TripType::Local => FareDetails::Local {
        package_id: normalize_package_id(
          self
            .package_id
            .as_deref()
            .or(request.package.as_deref())
            .unwrap_or_default(),
        ),
        price: self.price,
      },
      TripType::Airport => FareDetails::Airport {
        price: self.price,
        tier_price: self.tier_price,
        extra_km_charge: self.extra_km_charge,
        airport_fee: self.airport_fee,
      },
      TripType::Outstation | TripType::Tour => FareDetails::Outstation {
        price: self.price,
        base_fare: self.base_fare,
        per_km_rate: self.per_km_rate,
        driver_allowance: self.driver_allowance,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_price_aliases() {
    for body in [
      r#"{"price": 2400}"#,
      r#"{"fare": 2400}"#,
      r#"{"totalPrice": 2400}"#,
      r#"{"data": {"total_price": 2400}}"#,
    ] {
      let envelope: ApiEnvelope = serde_json::from_str(body).unwrap();
      assert_eq!(envelope.into_inner().price, 2400.0, "body {}", body);
    }
  }

  #[test]
  fn test_details_follow_request_trip_type() {
    let response: ApiFareResponse =
      serde_json::from_str(r#"{"price": 5850, "baseFare": 4200, "perKmRate": 14}"#).unwrap();
    let request = FareRequest::new("sedan", TripType::Tour, 200.0);

    match response.into_details(&request) {
      FareDetails::Outstation {
        price,
        base_fare,
        per_km_rate,
        driver_allowance,
      } => {
        assert_eq!(price, 5850.0);
        assert_eq!(base_fare, Some(4200.0));
        assert_eq!(per_km_rate, Some(14.0));
        assert_eq!(driver_allowance, None);
      }
      other => panic!("unexpected details {:?}", other),
    }
  }

  #[test]
  fn test_local_details_take_request_package_when_missing() {
    let response: ApiFareResponse = serde_json::from_str(r#"{"price": 1200}"#).unwrap();
    let request = FareRequest::new("sedan", TripType::Local, 0.0).with_package("4 hrs");
    assert_eq!(
      response.into_details(&request),
      FareDetails::Local {
        package_id: "4hrs-40km".to_string(),
        price: 1200.0
      }
    );
  }
}
