//! Test doubles shared by the resolver and consumer tests.

use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{DurableFareStore, SqliteStorage, VolatileFareCache};
use crate::clock::Clock;
use crate::error::FareError;
use crate::event::FareEventBus;
use crate::gateway::RemoteFareGateway;
use crate::throttle::ThrottleGate;

use super::fallback::FallbackPriceTable;
use super::resolver::{FareResolver, FareStores, ResolverSettings};
use super::types::{FareDetails, FareRequest, TripType};
use super::validator::FareValidator;

/// Gateway that answers every request with a settable price after a delay.
pub struct ScriptedGateway {
  calls: AtomicU32,
  delay: Duration,
  reply: Mutex<Result<f64, FareError>>,
}

impl ScriptedGateway {
  pub fn new(reply: Result<f64, FareError>, delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      calls: AtomicU32::new(0),
      delay,
      reply: Mutex::new(reply),
    })
  }

  pub fn failing() -> Arc<Self> {
    Self::new(Err(FareError::Gateway("connection refused".to_string())), Duration::ZERO)
  }

  pub fn set_reply(&self, reply: Result<f64, FareError>) {
    *self.reply.lock().unwrap() = reply;
  }

  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }
}

impl RemoteFareGateway for ScriptedGateway {
  fn fetch_fare(&self, request: &FareRequest) -> BoxFuture<'static, Result<FareDetails, FareError>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let reply = self.reply.lock().unwrap().clone();
    let delay = self.delay;
    let trip_type = request.trip_type;

    async move {
      tokio::time::sleep(delay).await;
      let price = reply?;
      Ok(match trip_type {
        TripType::Local => FareDetails::Local {
          package_id: "8hrs-80km".to_string(),
          price,
        },
        TripType::Airport => FareDetails::Airport {
          price,
          tier_price: None,
          extra_km_charge: None,
          airport_fee: None,
        },
        TripType::Outstation | TripType::Tour => FareDetails::Outstation {
          price,
          base_fare: None,
          per_km_rate: None,
          driver_allowance: None,
        },
      })
    }
    .boxed()
  }
}

/// Fresh stores backed by in-memory SQLite.
pub fn stores() -> FareStores {
  let validator = FareValidator::default();
  let clock = Clock::new();
  let gate = Arc::new(ThrottleGate::new());
  FareStores {
    volatile: Arc::new(VolatileFareCache::new(Duration::from_secs(15 * 60), validator, clock)),
    durable: Arc::new(DurableFareStore::new(
      Arc::new(SqliteStorage::in_memory().unwrap()),
      chrono::Duration::minutes(30),
      validator,
      clock,
    )),
    bus: FareEventBus::new(gate.clone(), Duration::from_secs(60), 5),
    gate,
    clock,
  }
}

pub fn resolver_with(
  gateway: Arc<ScriptedGateway>,
  settings: ResolverSettings,
) -> (FareResolver, FareStores) {
  let stores = stores();
  let resolver = FareResolver::new(
    stores.clone(),
    gateway,
    Arc::new(FallbackPriceTable::default()),
    FareValidator::default(),
    settings,
  );
  (resolver, stores)
}

/// Resolver with the remote interval throttle disabled.
pub fn resolver(gateway: Arc<ScriptedGateway>) -> (FareResolver, FareStores) {
  resolver_with(
    gateway,
    ResolverSettings {
      remote_min_interval: Duration::ZERO,
      ..ResolverSettings::default()
    },
  )
}
