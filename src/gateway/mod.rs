//! The backend fare API as seen by the resolver.

mod api_types;
mod http;

use futures::future::{self, BoxFuture, FutureExt};

use crate::error::FareError;
use crate::fare::types::{FareDetails, FareRequest};

pub use http::HttpFareGateway;

/// Fallible remote fare lookup.
///
/// The returned future must own everything it needs: the resolver spawns it
/// so a response arriving after the caller stopped waiting still lands in
/// the cache.
pub trait RemoteFareGateway: Send + Sync {
  fn fetch_fare(&self, request: &FareRequest) -> BoxFuture<'static, Result<FareDetails, FareError>>;
}

/// Gateway used when no endpoint is configured; every fetch fails.
pub struct OfflineGateway;

impl RemoteFareGateway for OfflineGateway {
  fn fetch_fare(&self, _request: &FareRequest) -> BoxFuture<'static, Result<FareDetails, FareError>> {
    future::ready(Err(FareError::Gateway("no fare endpoint configured".to_string()))).boxed()
  }
}
