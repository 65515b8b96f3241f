use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::fare::fallback::VehicleRates;
use crate::fare::resolver::{night_offset, ResolverSettings};
use crate::fare::types::VehicleClass;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub gateway: GatewayConfig,
  pub cache: CacheConfig,
  pub throttle: ThrottleConfig,
  pub consumer: ConsumerConfig,
  /// Local time zone for the day/night split, in minutes east of UTC
  pub night_offset_minutes: i32,
  /// Per-class replacements for the built-in fallback rates
  pub fallback: BTreeMap<VehicleClass, VehicleRates>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      gateway: GatewayConfig::default(),
      cache: CacheConfig::default(),
      throttle: ThrottleConfig::default(),
      consumer: ConsumerConfig::default(),
      night_offset_minutes: 330,
      fallback: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
  /// Equivalent fare endpoints, raced against each other.
  /// Empty means offline: every fare comes from the caches or the fallback table.
  pub endpoints: Vec<String>,
  pub timeout_ms: u64,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      endpoints: Vec::new(),
      timeout_ms: 5_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub volatile_ttl_secs: u64,
  pub durable_ttl_secs: u64,
  /// Persist fares across restarts (in-memory only when false)
  pub durable: bool,
  /// Database path (defaults to $XDG_DATA_HOME/farecache/fares.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      volatile_ttl_secs: 15 * 60,
      durable_ttl_secs: 30 * 60,
      durable: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
  pub remote_min_interval_ms: u64,
  pub remote_max_attempts: u32,
  pub force_refresh_interval_ms: u64,
  pub event_window_secs: u64,
  pub event_max_per_window: u32,
}

impl Default for ThrottleConfig {
  fn default() -> Self {
    Self {
      remote_min_interval_ms: 1_000,
      remote_max_attempts: 20,
      force_refresh_interval_ms: 5_000,
      event_window_secs: 60,
      event_max_per_window: 5,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
  pub debounce_ms: u64,
}

impl Default for ConsumerConfig {
  fn default() -> Self {
    Self { debounce_ms: 300 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./farecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/farecache/config.yaml
  ///
  /// Without a file every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("farecache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("farecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Parsed gateway endpoints.
  pub fn endpoint_urls(&self) -> Result<Vec<Url>> {
    self
      .gateway
      .endpoints
      .iter()
      .map(|raw| Url::parse(raw).map_err(|e| eyre!("Invalid fare endpoint {}: {}", raw, e)))
      .collect()
  }

  pub fn resolver_settings(&self) -> ResolverSettings {
    ResolverSettings {
      volatile_ttl: Duration::from_secs(self.cache.volatile_ttl_secs),
      remote_timeout: Duration::from_millis(self.gateway.timeout_ms),
      remote_min_interval: Duration::from_millis(self.throttle.remote_min_interval_ms),
      remote_max_attempts: self.throttle.remote_max_attempts,
      force_refresh_interval: Duration::from_millis(self.throttle.force_refresh_interval_ms),
      night_offset: night_offset(self.night_offset_minutes),
    }
  }

  pub fn event_window(&self) -> Duration {
    Duration::from_secs(self.throttle.event_window_secs)
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.consumer.debounce_ms)
  }

  /// Get the fare API token from the environment, if any.
  ///
  /// Checks FARECACHE_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FARECACHE_API_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
