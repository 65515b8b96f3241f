//! Composition root.
//!
//! `FareEngine` owns exactly one instance of every store and hands shared
//! references to the resolver and to each consumer it creates.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{DurableFareStore, KeyValueStore, SqliteStorage, VolatileFareCache};
use crate::clock::Clock;
use crate::config::Config;
use crate::event::FareEventBus;
use crate::fare::consumer::FareConsumer;
use crate::fare::fallback::FallbackPriceTable;
use crate::fare::resolver::{FareResolver, FareStores};
use crate::fare::validator::FareValidator;
use crate::gateway::{HttpFareGateway, OfflineGateway, RemoteFareGateway};
use crate::throttle::ThrottleGate;

pub struct FareEngine {
  config: Config,
  stores: FareStores,
  resolver: FareResolver,
}

impl FareEngine {
  /// Build the engine from configuration: SQLite storage and the HTTP
  /// gateway, or the offline gateway when no endpoint is configured.
  pub fn new(config: Config) -> Result<Self> {
    let store: Arc<dyn KeyValueStore> = if !config.cache.durable {
      Arc::new(SqliteStorage::in_memory()?)
    } else if let Some(path) = &config.cache.path {
      Arc::new(SqliteStorage::open_at(path)?)
    } else {
      Arc::new(SqliteStorage::open()?)
    };

    let endpoints = config.endpoint_urls()?;
    let gateway: Arc<dyn RemoteFareGateway> = if endpoints.is_empty() {
      info!("No fare endpoint configured, running offline");
      Arc::new(OfflineGateway)
    } else {
      info!(endpoints = endpoints.len(), "Using remote fare gateway");
      Arc::new(HttpFareGateway::new(
        endpoints,
        Config::get_api_token(),
        Duration::from_millis(config.gateway.timeout_ms),
      )?)
    };

    Self::with_parts(config, store, gateway)
  }

  /// Build the engine around an explicit store and gateway.
  pub fn with_parts(
    config: Config,
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn RemoteFareGateway>,
  ) -> Result<Self> {
    let validator = FareValidator::default();
    let fallback = FallbackPriceTable::with_overrides(&config.fallback, validator)?;

    let durable_ttl = chrono::Duration::from_std(Duration::from_secs(config.cache.durable_ttl_secs))
      .map_err(|e| eyre!("Invalid durable TTL: {}", e))?;

    let clock = Clock::new();
    let gate = Arc::new(ThrottleGate::new());
    let stores = FareStores {
      volatile: Arc::new(VolatileFareCache::new(
        Duration::from_secs(config.cache.volatile_ttl_secs),
        validator,
        clock,
      )),
      durable: Arc::new(DurableFareStore::new(store, durable_ttl, validator, clock)),
      bus: FareEventBus::new(
        gate.clone(),
        config.event_window(),
        config.throttle.event_max_per_window,
      ),
      gate,
      clock,
    };

    // Rows left behind by earlier runs
    match stores.durable.purge_expired() {
      Ok(0) => {}
      Ok(removed) => info!(removed, "Swept expired durable fares"),
      Err(e) => warn!(error = %e, "Durable fare sweep failed"),
    }

    let resolver = FareResolver::new(
      stores.clone(),
      gateway,
      Arc::new(fallback),
      validator,
      config.resolver_settings(),
    );

    Ok(Self {
      config,
      stores,
      resolver,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn resolver(&self) -> &FareResolver {
    &self.resolver
  }

  pub fn bus(&self) -> &FareEventBus {
    &self.stores.bus
  }

  pub fn stores(&self) -> &FareStores {
    &self.stores
  }

  /// A new debounced consumer attached to this engine's bus.
  pub fn consumer(&self) -> FareConsumer {
    FareConsumer::new(self.resolver.clone(), &self.stores.bus, self.config.debounce())
  }
}
