//! Fare resolution cascade.
//!
//! Lookup order, stopping at the first hit:
//!
//! 1. Validated fare for (vehicle, trip type), checked even when forced
//! 2. Volatile cache by canonical key
//! 3. Durable store by canonical key, promoted back into the volatile cache
//! 4. Remote gateway, throttled per fare family and raced against a timeout
//! 5. Fallback price table
//!
//! Steps 4 and 5 run at most once per canonical key at a time; concurrent
//! callers for the same key share the pending result.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::{DurableFareStore, VolatileFareCache};
use crate::clock::Clock;
use crate::error::FareError;
use crate::event::{FareEvent, FareEventBus};
use crate::gateway::RemoteFareGateway;
use crate::throttle::ThrottleGate;

use super::fallback::FallbackPriceTable;
use super::key::CanonicalKey;
use super::normalize::{classify_package, normalize_package_id};
use super::types::{CacheEntry, FareDetails, FareRequest, FareSource, TripType, ValidatedFare};
use super::validator::FareValidator;

type PendingResolution = Shared<BoxFuture<'static, Result<CacheEntry, FareError>>>;

/// Timing and throttling knobs for the cascade.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
  pub volatile_ttl: Duration,
  pub remote_timeout: Duration,
  /// Minimum gap between remote fetches in one fare family
  pub remote_min_interval: Duration,
  /// Remote fetches allowed per fare family until the gate is reset
  pub remote_max_attempts: u32,
  /// Minimum gap between forced refreshes of one key
  pub force_refresh_interval: Duration,
  /// Offset used to decide whether a pickup is at night
  pub night_offset: FixedOffset,
}

impl Default for ResolverSettings {
  fn default() -> Self {
    Self {
      volatile_ttl: Duration::from_secs(15 * 60),
      remote_timeout: Duration::from_secs(5),
      remote_min_interval: Duration::from_secs(1),
      remote_max_attempts: 20,
      force_refresh_interval: Duration::from_secs(5),
      night_offset: night_offset(330),
    }
  }
}

/// Local-time offset from minutes east of UTC; out-of-range values mean UTC.
pub fn night_offset(minutes_east: i32) -> FixedOffset {
  minutes_east
    .checked_mul(60)
    .and_then(FixedOffset::east_opt)
    .unwrap_or_else(|| Utc.fix())
}

/// The shared stores a resolver reads and writes.
#[derive(Clone)]
pub struct FareStores {
  pub volatile: Arc<VolatileFareCache>,
  pub durable: Arc<DurableFareStore>,
  pub gate: Arc<ThrottleGate>,
  pub bus: FareEventBus,
  /// Time source every tier stamps and expires entries with
  pub clock: Clock,
}

struct ResolverInner {
  stores: FareStores,
  gateway: Arc<dyn RemoteFareGateway>,
  fallback: Arc<FallbackPriceTable>,
  validator: FareValidator,
  settings: ResolverSettings,
  in_flight: Mutex<HashMap<CanonicalKey, PendingResolution>>,
}

impl ResolverInner {
  fn in_flight(&self) -> MutexGuard<'_, HashMap<CanonicalKey, PendingResolution>> {
    self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// One request with its canonical key.
#[derive(Debug, Clone)]
struct Resolution {
  request: FareRequest,
  key: CanonicalKey,
}

/// Resolves fare requests through the cache tiers.
#[derive(Clone)]
pub struct FareResolver {
  inner: Arc<ResolverInner>,
}

impl FareResolver {
  pub fn new(
    stores: FareStores,
    gateway: Arc<dyn RemoteFareGateway>,
    fallback: Arc<FallbackPriceTable>,
    validator: FareValidator,
    settings: ResolverSettings,
  ) -> Self {
    Self {
      inner: Arc::new(ResolverInner {
        stores,
        gateway,
        fallback,
        validator,
        settings,
        in_flight: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn settings(&self) -> &ResolverSettings {
    &self.inner.settings
  }

  /// Canonical key for a request under this resolver's settings.
  pub fn key_for(&self, request: &FareRequest) -> Result<CanonicalKey, FareError> {
    CanonicalKey::from_request(request, self.inner.settings.night_offset)
  }

  fn resolution(&self, request: &FareRequest) -> Result<Resolution, FareError> {
    let key = self.key_for(request)?;

    if request.trip_type == TripType::Local {
      if let Some(raw) = request.package.as_deref() {
        if classify_package(raw).is_none() {
          warn!(package = raw, "Unrecognized package, pricing as 8hrs-80km");
        }
      }
    }

    Ok(Resolution {
      request: request.clone(),
      key,
    })
  }

  /// Resolve a fare. Only malformed requests and a broken fallback table fail.
  pub async fn resolve(&self, request: &FareRequest) -> Result<u32, FareError> {
    Ok(self.resolve_entry(request).await?.fare)
  }

  /// Resolve bypassing the volatile and durable tiers.
  pub async fn refresh(&self, request: &FareRequest) -> Result<u32, FareError> {
    let forced = FareRequest {
      force_refresh: true,
      ..request.clone()
    };
    self.resolve(&forced).await
  }

  /// Resolve a fare and report which tier produced it.
  pub async fn resolve_entry(&self, request: &FareRequest) -> Result<CacheEntry, FareError> {
    let resolution = self.resolution(request)?;
    let key = &resolution.key;

    if let Some(entry) = self.lookup_validated(key) {
      return Ok(entry);
    }

    let mut forced = request.force_refresh;
    if forced
      && self.inner.stores.gate.should_throttle(
        &format!("force-refresh:{}", key),
        self.inner.settings.force_refresh_interval,
      )
    {
      debug!(key = %key, "Forced refresh throttled, using caches");
      forced = false;
    }

    if !forced {
      if let Some(entry) = self.lookup_cached(key) {
        return Ok(entry);
      }
    }

    self.join_or_start(resolution).await
  }

  /// Fare from the cache tiers only; 0 when nothing is cached.
  pub fn get_cached_only(&self, request: &FareRequest) -> u32 {
    let Ok(key) = self.key_for(request) else {
      return 0;
    };
    self
      .lookup_validated(&key)
      .or_else(|| self.lookup_cached(&key))
      .map_or(0, |entry| entry.fare)
  }

  /// Lock in a fare for (vehicle, trip type) until released or cleared.
  ///
  /// The amount is validated and rounded up to the nearest 10 like any
  /// other fare.
  pub fn confirm(&self, request: &FareRequest, fare: u32) -> Result<ValidatedFare, FareError> {
    let key = self.key_for(request)?;
    let class = key.vehicle_class();
    let raw = f64::from(fare);
    let fare = self
      .inner
      .validator
      .accept(raw, class, key.trip_type, request.distance_km)
      .ok_or(FareError::Validation {
        fare: raw,
        class,
        trip_type: key.trip_type,
      })?;

    let validated = ValidatedFare {
      vehicle_id: key.vehicle_id.clone(),
      trip_type: key.trip_type,
      fare,
      distance_km: request.distance_km,
      confirmed_at: self.now(),
    };
    self.inner.stores.durable.store_validated(&validated)?;
    info!(vehicle_id = %key.vehicle_id, trip_type = %key.trip_type, fare, "Fare confirmed");
    Ok(validated)
  }

  /// Drop a confirmed fare, e.g. when its booking flow ends.
  pub fn release(&self, vehicle_id: &str, trip_type: TripType) -> Result<(), FareError> {
    self
      .inner
      .stores
      .durable
      .remove_validated(vehicle_id, trip_type)
  }

  /// Empty every tier and tell consumers.
  ///
  /// A forced clear also resets the throttle gate so the next resolutions
  /// may go to the network again.
  pub fn clear_all(&self, force_refresh: bool) -> Result<(), FareError> {
    let stores = &self.inner.stores;
    stores.volatile.clear();
    let removed = stores.durable.clear()?;
    if force_refresh {
      stores.gate.reset();
    }
    info!(removed, force_refresh, "Fare caches cleared");

    stores.bus.publish(FareEvent::CacheCleared {
      timestamp: stores.clock.now(),
      force_refresh,
    });
    Ok(())
  }

  fn lookup_validated(&self, key: &CanonicalKey) -> Option<CacheEntry> {
    match self
      .inner
      .stores
      .durable
      .get_validated(&key.vehicle_id, key.trip_type)
    {
      Ok(Some(validated)) => {
        debug!(key = %key, fare = validated.fare, "Validated fare hit");
        Some(CacheEntry {
          key: key.clone(),
          fare: validated.fare,
          created_at: validated.confirmed_at,
          expires_at: DateTime::<Utc>::MAX_UTC,
          source: FareSource::Validated,
        })
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key = %key, error = %e, "Validated fare lookup failed");
        None
      }
    }
  }

  fn lookup_cached(&self, key: &CanonicalKey) -> Option<CacheEntry> {
    let stores = &self.inner.stores;

    if let Some(entry) = stores.volatile.get(key) {
      debug!(key = %key, fare = entry.fare, "Volatile cache hit");
      return Some(entry);
    }

    match stores.durable.get_fare(key) {
      Ok(Some(entry)) => {
        debug!(key = %key, fare = entry.fare, "Durable cache hit");
        let promoted =
          entry.promoted(FareSource::DurableRestore, self.now(), self.volatile_ttl());
        if let Err(e) = stores.volatile.insert(promoted.clone()) {
          warn!(key = %key, error = %e, "Failed to promote durable fare");
        }
        Some(promoted)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key = %key, error = %e, "Durable fare lookup failed");
        None
      }
    }
  }

  fn now(&self) -> DateTime<Utc> {
    self.inner.stores.clock.now()
  }

  fn volatile_ttl(&self) -> chrono::Duration {
    chrono::Duration::from_std(self.inner.settings.volatile_ttl)
      .unwrap_or_else(|_| chrono::Duration::minutes(15))
  }

  /// Attach to the pending resolution for this key, or start one.
  async fn join_or_start(&self, resolution: Resolution) -> Result<CacheEntry, FareError> {
    let pending = {
      let mut in_flight = self.inner.in_flight();
      match in_flight.get(&resolution.key).cloned() {
        Some(pending) => {
          debug!(key = %resolution.key, "Joining in-flight resolution");
          pending
        }
        None => {
          let key = resolution.key.clone();
          let this = self.clone();
          // The pipeline runs to completion even if every caller goes away
          let task = tokio::spawn(async move {
            let result = this.fetch_or_fallback(&resolution).await;
            this.inner.in_flight().remove(&resolution.key);
            result
          });
          let pending = async move {
            task
              .await
              .unwrap_or_else(|e| Err(FareError::Aborted(e.to_string())))
          }
          .boxed()
          .shared();
          in_flight.insert(key, pending.clone());
          pending
        }
      }
    };

    pending.await
  }

  async fn fetch_or_fallback(&self, resolution: &Resolution) -> Result<CacheEntry, FareError> {
    if let Some(entry) = self.fetch_remote(resolution).await {
      return Ok(entry);
    }

    let key = &resolution.key;
    let fare = self.inner.fallback.compute_fallback(
      &key.vehicle_id,
      key.trip_type,
      key.trip_mode,
      resolution.request.distance_km,
      key.package_id.as_deref(),
    )?;

    debug!(key = %key, fare, "Using fallback fare");
    let entry = CacheEntry::new(
      key.clone(),
      fare,
      FareSource::ComputedFallback,
      self.now(),
      self.volatile_ttl(),
    );
    self.write_through(&entry);
    Ok(entry)
  }

  /// Ask the gateway, giving up after the timeout.
  ///
  /// The fetch itself is spawned: a response that arrives after the timeout
  /// is still validated and cached, it just no longer answers this call.
  async fn fetch_remote(&self, resolution: &Resolution) -> Option<CacheEntry> {
    let settings = &self.inner.settings;
    let gate = &self.inner.stores.gate;
    let key = &resolution.key;
    let family = key.family();

    if gate.should_throttle(&format!("remote:{}", family), settings.remote_min_interval) {
      debug!(family, "Remote fetch throttled");
      return None;
    }
    if !gate.take_attempt(
      &format!("remote-attempts:{}", family),
      settings.remote_max_attempts,
    ) {
      warn!(family, "Remote fetch attempts exhausted for this session");
      return None;
    }

    let fetch = self.inner.gateway.fetch_fare(&resolution.request);
    let (tx, rx) = oneshot::channel();
    let this = self.clone();
    let task_key = key.clone();

    tokio::spawn(async move {
      let accepted = match fetch.await {
        Ok(details) => this.accept_remote(&task_key, &details),
        Err(e) => {
          warn!(key = %task_key, error = %e, "Fare fetch failed");
          None
        }
      };
      // Receiver is gone if the caller timed out
      let _ = tx.send(accepted);
    });

    match tokio::time::timeout(settings.remote_timeout, rx).await {
      Ok(Ok(entry)) => entry,
      Ok(Err(_)) => None,
      Err(_) => {
        let error = FareError::Timeout(settings.remote_timeout.as_millis() as u64);
        warn!(key = %key, error = %error, "Falling back");
        None
      }
    }
  }

  fn accept_remote(&self, key: &CanonicalKey, details: &FareDetails) -> Option<CacheEntry> {
    if !details.matches(key.trip_type) {
      warn!(key = %key, ?details, "Discarding remote fare for another trip type");
      return None;
    }
    if let FareDetails::Local { package_id, .. } = details {
      if key.package_id.as_deref() != Some(normalize_package_id(package_id).as_str()) {
        warn!(key = %key, package_id = %package_id, "Discarding remote fare for another package");
        return None;
      }
    }

    let Some(fare) = self.inner.validator.accept(
      details.price(),
      key.vehicle_class(),
      key.trip_type,
      key.distance_km(),
    ) else {
      warn!(key = %key, price = details.price(), "Discarding remote fare that fails validation");
      return None;
    };

    let entry = CacheEntry::new(
      key.clone(),
      fare,
      FareSource::Remote,
      self.now(),
      self.volatile_ttl(),
    );
    self.write_through(&entry);
    Some(entry)
  }

  /// Store a resolved entry in both tiers and announce it.
  fn write_through(&self, entry: &CacheEntry) {
    let stores = &self.inner.stores;

    if let Err(e) = stores.volatile.insert(entry.clone()) {
      warn!(key = %entry.key, error = %e, "Refusing to cache fare");
      return;
    }
    if let Err(e) = stores.durable.store_fare(entry) {
      warn!(key = %entry.key, error = %e, "Failed to persist fare");
    }

    stores.bus.publish(FareEvent::FareUpdated {
      vehicle_id: entry.key.vehicle_id.clone(),
      package_id: entry.key.package_id.clone(),
      key: entry.key.to_string(),
      price: entry.fare,
      source: entry.source,
      timestamp: self.now(),
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::EventKind;
  use crate::fare::testing::{resolver, resolver_with, ScriptedGateway};
  use crate::fare::types::{TripMode, VehicleClass};
  use futures::future;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn local_sedan() -> FareRequest {
    FareRequest::new("sedan", TripType::Local, 0.0).with_package("8hrs-80km")
  }

  fn outstation_sedan() -> FareRequest {
    FareRequest::new("sedan", TripType::Outstation, 200.0)
  }

  #[tokio::test(start_paused = true)]
  async fn test_gateway_failure_falls_back_to_table() {
    let gateway = ScriptedGateway::failing();
    let (resolver, stores) = resolver(gateway.clone());

    let fare = resolver.resolve(&local_sedan()).await.unwrap();
    assert_eq!(fare, 2400);
    assert_eq!(gateway.calls(), 1);

    let key = resolver.key_for(&local_sedan()).unwrap();
    let cached = stores.volatile.get(&key).unwrap();
    assert_eq!(cached.fare, 2400);
    assert_eq!(cached.source, FareSource::ComputedFallback);
    assert_eq!(stores.durable.get_fare(&key).unwrap().map(|e| e.fare), Some(2400));
  }

  #[tokio::test(start_paused = true)]
  async fn test_remote_fare_is_written_through() {
    let gateway = ScriptedGateway::new(Ok(6001.0), Duration::from_millis(50));
    let (resolver, stores) = resolver(gateway.clone());

    let entry = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(entry.fare, 6010);
    assert_eq!(entry.source, FareSource::Remote);

    let key = resolver.key_for(&outstation_sedan()).unwrap();
    assert_eq!(stores.volatile.get(&key).map(|e| e.fare), Some(6010));
    assert_eq!(stores.durable.get_fare(&key).unwrap().map(|e| e.fare), Some(6010));
  }

  #[tokio::test(start_paused = true)]
  async fn test_repeat_resolve_hits_volatile_then_durable() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::ZERO);
    let (resolver, _) = resolver(gateway.clone());

    resolver.resolve(&outstation_sedan()).await.unwrap();
    tokio::time::advance(Duration::from_secs(10 * 60)).await;

    let again = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(again.fare, 6000);
    assert_eq!(again.source, FareSource::Remote);
    assert_eq!(gateway.calls(), 1);

    // Past the volatile TTL the durable copy is still fresh
    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    let restored = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(restored.fare, 6000);
    assert_eq!(restored.source, FareSource::DurableRestore);
    assert_eq!(gateway.calls(), 1);

    // The promoted copy dies with the durable one, 30 minutes after the fetch
    gateway.set_reply(Ok(6200.0));
    tokio::time::advance(Duration::from_secs(15 * 60)).await;
    let refetched = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(refetched.fare, 6200);
    assert_eq!(refetched.source, FareSource::Remote);
    assert_eq!(gateway.calls(), 2);
  }

  fn seed_durable(
    resolver: &FareResolver,
    stores: &FareStores,
    fare: u32,
    age_minutes: i64,
  ) -> CacheEntry {
    let key = resolver.key_for(&outstation_sedan()).unwrap();
    let entry = CacheEntry::new(
      key,
      fare,
      FareSource::Remote,
      stores.clock.now() - chrono::Duration::minutes(age_minutes),
      chrono::Duration::minutes(15),
    );
    stores.durable.store_fare(&entry).unwrap();
    entry
  }

  #[tokio::test(start_paused = true)]
  async fn test_promoted_durable_fare_keeps_its_deadline() {
    let gateway = ScriptedGateway::new(Ok(6200.0), Duration::ZERO);
    let (resolver, stores) = resolver(gateway.clone());
    let seeded = seed_durable(&resolver, &stores, 6000, 29);

    let restored = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(restored.fare, 6000);
    assert_eq!(restored.source, FareSource::DurableRestore);
    assert_eq!(restored.expires_at, seeded.created_at + chrono::Duration::minutes(30));
    assert_eq!(gateway.calls(), 0);

    // One minute of life was left; the volatile copy must not outlive it
    tokio::time::advance(Duration::from_secs(2 * 60)).await;
    let key = resolver.key_for(&outstation_sedan()).unwrap();
    assert!(stores.volatile.get(&key).is_none());

    let fresh = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(fresh.fare, 6200);
    assert_eq!(fresh.source, FareSource::Remote);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_durable_fare_past_its_lifetime_is_not_served() {
    let gateway = ScriptedGateway::new(Ok(6200.0), Duration::ZERO);
    let (resolver, stores) = resolver(gateway.clone());
    seed_durable(&resolver, &stores, 6000, 31);

    assert_eq!(resolver.get_cached_only(&outstation_sedan()), 0);
    let entry = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(entry.fare, 6200);
    assert_eq!(entry.source, FareSource::Remote);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_resolves_share_one_fetch() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::from_millis(200));
    let (resolver, _) = resolver(gateway.clone());

    let first = outstation_sedan();
    // Same bucket, so the same canonical key
    let second = FareRequest::new("Sedan", TripType::Outstation, 203.0);

    let (a, b) = tokio::join!(resolver.resolve(&first), resolver.resolve(&second));
    assert_eq!(a.unwrap(), 6000);
    assert_eq!(b.unwrap(), 6000);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_many_concurrent_resolves_share_one_fetch() {
    let gateway = ScriptedGateway::new(Ok(2600.0), Duration::from_millis(200));
    let (resolver, _) = resolver(gateway.clone());

    let request = local_sedan();
    let results = future::join_all((0..10).map(|_| resolver.resolve(&request))).await;
    assert!(results.into_iter().all(|r| r == Ok(2600)));
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_validated_fare_wins_even_when_forced() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::ZERO);
    let (resolver, _) = resolver(gateway.clone());

    assert_eq!(resolver.resolve(&outstation_sedan()).await.unwrap(), 6000);
    resolver.confirm(&outstation_sedan(), 7000).unwrap();

    assert_eq!(resolver.resolve(&outstation_sedan()).await.unwrap(), 7000);
    assert_eq!(resolver.refresh(&outstation_sedan()).await.unwrap(), 7000);
    assert_eq!(resolver.get_cached_only(&outstation_sedan()), 7000);
    assert_eq!(gateway.calls(), 1);

    // Validated fares ignore distance
    let longer = FareRequest::new("sedan", TripType::Outstation, 450.0);
    assert_eq!(resolver.resolve(&longer).await.unwrap(), 7000);

    resolver.release("Sedan", TripType::Outstation).unwrap();
    assert_eq!(resolver.resolve(&outstation_sedan()).await.unwrap(), 6000);
  }

  #[tokio::test(start_paused = true)]
  async fn test_confirm_rounds_up_to_ten() {
    let (resolver, _) = resolver(ScriptedGateway::failing());

    let validated = resolver.confirm(&outstation_sedan(), 7005).unwrap();
    assert_eq!(validated.fare, 7010);
    assert_eq!(resolver.resolve(&outstation_sedan()).await.unwrap(), 7010);
  }

  #[tokio::test(start_paused = true)]
  async fn test_confirm_rejects_implausible_fare() {
    let (resolver, _) = resolver(ScriptedGateway::failing());
    let result = resolver.confirm(&local_sedan(), 50);
    assert!(matches!(result, Err(FareError::Validation { .. })));
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalid_remote_value_is_discarded() {
    let gateway = ScriptedGateway::new(Ok(5.0), Duration::ZERO);
    let (resolver, stores) = resolver(gateway.clone());

    let entry = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(entry.fare, 5850);
    assert_eq!(entry.source, FareSource::ComputedFallback);

    let key = resolver.key_for(&outstation_sedan()).unwrap();
    assert_eq!(stores.volatile.get(&key).map(|e| e.source), Some(FareSource::ComputedFallback));
  }

  #[tokio::test(start_paused = true)]
  async fn test_remote_fare_for_another_package_is_discarded() {
    // The scripted gateway always prices the 8 hour package
    let gateway = ScriptedGateway::new(Ok(2600.0), Duration::ZERO);
    let (resolver, stores) = resolver(gateway.clone());
    let four_hours = FareRequest::new("sedan", TripType::Local, 0.0).with_package("4 hrs");

    let entry = resolver.resolve_entry(&four_hours).await.unwrap();
    assert_eq!(entry.fare, 1200);
    assert_eq!(entry.source, FareSource::ComputedFallback);
    assert_eq!(gateway.calls(), 1);

    let key = resolver.key_for(&four_hours).unwrap();
    assert_eq!(stores.volatile.get(&key).map(|e| e.fare), Some(1200));
  }

  #[tokio::test(start_paused = true)]
  async fn test_long_trips_resolve_past_the_fixed_ceiling() {
    let (resolver, _) = resolver(ScriptedGateway::failing());
    let cases = [
      ("luxury", TripType::Outstation, 3200.0, 206_100),
      ("luxury", TripType::Airport, 460.0, 20_300),
      ("sedan", TripType::Outstation, 7200.0, 201_850),
    ];
    for (vehicle, trip_type, distance_km, expected) in cases {
      let request = FareRequest::new(vehicle, trip_type, distance_km);
      let entry = resolver.resolve_entry(&request).await.unwrap();
      assert_eq!(entry.fare, expected, "{:?}", request);
      assert_eq!(resolver.get_cached_only(&request), expected);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_absurd_remote_value_on_long_trip_is_discarded() {
    let gateway = ScriptedGateway::new(Ok(9_000_000.0), Duration::ZERO);
    let (resolver, _) = resolver(gateway.clone());
    let request = FareRequest::new("sedan", TripType::Outstation, 7200.0);

    let entry = resolver.resolve_entry(&request).await.unwrap();
    assert_eq!(entry.fare, 201_850);
    assert_eq!(entry.source, FareSource::ComputedFallback);
  }

  #[tokio::test(start_paused = true)]
  async fn test_late_remote_response_still_lands_in_cache() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::from_secs(10));
    let (resolver, _) = resolver(gateway.clone());

    let entry = resolver.resolve_entry(&outstation_sedan()).await.unwrap();
    assert_eq!(entry.fare, 5850);
    assert_eq!(entry.source, FareSource::ComputedFallback);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(resolver.get_cached_only(&outstation_sedan()), 6000);
  }

  #[tokio::test(start_paused = true)]
  async fn test_malformed_request_fails_without_fetching() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::ZERO);
    let (resolver, _) = resolver(gateway.clone());
    let request = FareRequest::new("  ", TripType::Local, 0.0);

    assert!(matches!(
      resolver.resolve(&request).await,
      Err(FareError::MalformedRequest(_))
    ));
    assert_eq!(resolver.get_cached_only(&request), 0);
    assert_eq!(gateway.calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_forced_refresh_is_throttled_per_key() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::ZERO);
    let (resolver, _) = resolver(gateway.clone());

    assert_eq!(resolver.resolve(&outstation_sedan()).await.unwrap(), 6000);

    gateway.set_reply(Ok(6200.0));
    assert_eq!(resolver.refresh(&outstation_sedan()).await.unwrap(), 6200);
    assert_eq!(gateway.calls(), 2);

    gateway.set_reply(Ok(6400.0));
    assert_eq!(resolver.refresh(&outstation_sedan()).await.unwrap(), 6200);
    assert_eq!(gateway.calls(), 2);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(resolver.refresh(&outstation_sedan()).await.unwrap(), 6400);
    assert_eq!(gateway.calls(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_remote_attempts_are_capped_per_family() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::ZERO);
    let (resolver, _) = resolver_with(
      gateway.clone(),
      ResolverSettings {
        remote_min_interval: Duration::ZERO,
        remote_max_attempts: 1,
        ..ResolverSettings::default()
      },
    );

    assert_eq!(resolver.resolve(&outstation_sedan()).await.unwrap(), 6000);
    // Different bucket, same family
    let shorter = FareRequest::new("sedan", TripType::Outstation, 120.0);
    assert_eq!(resolver.resolve(&shorter).await.unwrap(), 4450);
    assert_eq!(gateway.calls(), 1);

    // Other families are unaffected
    let round_trip = outstation_sedan().with_mode(TripMode::RoundTrip);
    assert_eq!(resolver.resolve(&round_trip).await.unwrap(), 6000);
    assert_eq!(gateway.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_remote_min_interval_throttles_family() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::ZERO);
    let (resolver, _) = resolver_with(gateway.clone(), ResolverSettings::default());

    assert_eq!(resolver.resolve(&outstation_sedan()).await.unwrap(), 6000);
    let shorter = FareRequest::new("sedan", TripType::Outstation, 120.0);
    assert_eq!(resolver.resolve(&shorter).await.unwrap(), 4450);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_resolution_publishes_fare_updated() {
    let gateway = ScriptedGateway::failing();
    let (resolver, stores) = resolver(gateway);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = stores.bus.subscribe(EventKind::FareUpdated, move |event| {
      sink.lock().unwrap().push(event.clone());
    });

    resolver.resolve(&local_sedan()).await.unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
      FareEvent::FareUpdated {
        vehicle_id,
        package_id,
        price,
        source,
        ..
      } => {
        assert_eq!(vehicle_id, "sedan");
        assert_eq!(package_id.as_deref(), Some("8hrs-80km"));
        assert_eq!(*price, 2400);
        assert_eq!(*source, FareSource::ComputedFallback);
      }
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_clear_all_empties_every_tier() {
    let gateway = ScriptedGateway::new(Ok(6000.0), Duration::ZERO);
    let (resolver, stores) = resolver(gateway.clone());

    let cleared = Arc::new(AtomicU32::new(0));
    let counter = cleared.clone();
    let _sub = stores.bus.subscribe(EventKind::CacheCleared, move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    resolver.resolve(&outstation_sedan()).await.unwrap();
    resolver.confirm(&local_sedan(), 2500).unwrap();
    resolver.clear_all(true).unwrap();

    assert_eq!(resolver.get_cached_only(&outstation_sedan()), 0);
    assert_eq!(resolver.get_cached_only(&local_sedan()), 0);
    assert!(stores.volatile.is_empty());
    assert_eq!(cleared.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_every_resolution_is_positive_and_valid() {
    let (resolver, _) = resolver(ScriptedGateway::failing());
    let validator = FareValidator::default();

    for vehicle in ["sedan", "Ertiga", "innova crysta", "MPV", "tempo", "luxury", "unknown"] {
      for trip_type in [TripType::Local, TripType::Airport, TripType::Outstation, TripType::Tour] {
        for distance in [0.0, 9.0, 35.0, 180.0] {
          let request = FareRequest::new(vehicle, trip_type, distance).with_mode(TripMode::RoundTrip);
          let fare = resolver.resolve(&request).await.unwrap();
          let class = VehicleClass::from_vehicle_id(&resolver.key_for(&request).unwrap().vehicle_id);
          assert!(fare > 0);
          assert!(
            validator.is_valid(f64::from(fare), class, trip_type, distance),
            "{:?}",
            request
          );
        }
      }
    }
  }
}
