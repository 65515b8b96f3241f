//! HTTP fare gateway.

use futures::future::{self, BoxFuture, FutureExt};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::FareError;
use crate::fare::normalize::{normalize_package_id, normalize_vehicle_id};
use crate::fare::types::{FareDetails, FareRequest, TripType};

use super::api_types::ApiEnvelope;
use super::RemoteFareGateway;

/// Fetches fares from one or more equivalent backend endpoints.
///
/// All endpoints are queried at once and the first successful answer wins;
/// the remaining requests are dropped, which cancels them.
#[derive(Clone)]
pub struct HttpFareGateway {
  client: Client,
  endpoints: Vec<Url>,
  token: Option<String>,
}

impl HttpFareGateway {
  pub fn new(endpoints: Vec<Url>, token: Option<String>, timeout: Duration) -> Result<Self, FareError> {
    if endpoints.is_empty() {
      return Err(FareError::Gateway("at least one fare endpoint is required".to_string()));
    }

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| FareError::Gateway(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      endpoints,
      token,
    })
  }

  /// Endpoint URL with the request encoded as query parameters.
  pub fn request_url(endpoint: &Url, request: &FareRequest) -> Url {
    let mut url = endpoint.clone();
    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("vehicle_id", &normalize_vehicle_id(&request.vehicle_id))
        .append_pair("trip_type", request.trip_type.as_str())
        .append_pair("trip_mode", request.trip_mode.as_str())
        .append_pair("distance_km", &request.distance_km.to_string());

      if request.trip_type == TripType::Local {
        query.append_pair(
          "package_id",
          &normalize_package_id(request.package.as_deref().unwrap_or_default()),
        );
      }
      if let Some(pickup) = request.pickup_at {
        query.append_pair("pickup_at", &pickup.to_rfc3339());
      }
      if let Some(ret) = request.return_at {
        query.append_pair("return_at", &ret.to_rfc3339());
      }
    }
    url
  }

  async fn fetch_from(
    client: Client,
    url: Url,
    token: Option<String>,
    request: FareRequest,
  ) -> Result<FareDetails, FareError> {
    debug!(%url, "Fetching fare");

    let mut builder = client.get(url.clone());
    if let Some(token) = token {
      builder = builder.bearer_auth(token);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FareError::Gateway(format!("{}: {}", url, e)))?
      .error_for_status()
      .map_err(|e| FareError::Gateway(format!("{}: {}", url, e)))?;

    let envelope: ApiEnvelope = response
      .json()
      .await
      .map_err(|e| FareError::Gateway(format!("Failed to parse fare from {}: {}", url, e)))?;

    Ok(envelope.into_inner().into_details(&request))
  }
}

impl RemoteFareGateway for HttpFareGateway {
  fn fetch_fare(&self, request: &FareRequest) -> BoxFuture<'static, Result<FareDetails, FareError>> {
    let attempts: Vec<_> = self
      .endpoints
      .iter()
      .map(|endpoint| {
        Self::fetch_from(
          self.client.clone(),
          Self::request_url(endpoint, request),
          self.token.clone(),
          request.clone(),
        )
        .boxed()
      })
      .collect();

    async move {
      future::select_ok(attempts)
        .await
        .map(|(details, _rest)| details)
    }
    .boxed()
  }
}
