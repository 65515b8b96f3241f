use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use farecache::config::Config;
use farecache::fare::fallback::FallbackPriceTable;
use farecache::fare::normalize::normalize_vehicle_id;
use farecache::fare::validator::FareValidator;
use farecache::{FareEngine, FareRequest, TripMode, TripType};

#[derive(Parser, Debug)]
#[command(name = "farecache")]
#[command(about = "Resolve and cache taxi fares")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/farecache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve a fare through every tier
  Resolve {
    #[command(flatten)]
    request: RequestArgs,
    /// Bypass the cached tiers
    #[arg(long)]
    refresh: bool,
  },
  /// Print the cached fare, or 0 when nothing is cached
  Cached {
    #[command(flatten)]
    request: RequestArgs,
  },
  /// Lock in a fare for a vehicle and trip type
  Confirm {
    #[command(flatten)]
    request: RequestArgs,
    #[arg(long)]
    fare: u32,
  },
  /// Drop a confirmed fare
  Release {
    vehicle: String,
    #[arg(long, default_value = "local")]
    trip: TripType,
  },
  /// Empty every cache tier
  Clear {
    /// Also reset the throttles
    #[arg(long)]
    force: bool,
  },
  /// Price a request from the fallback table only
  Quote {
    #[command(flatten)]
    request: RequestArgs,
  },
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
  /// Vehicle id, e.g. "sedan" or "Innova Crysta"
  vehicle: String,
  /// outstation, local, airport or tour
  #[arg(long, default_value = "local")]
  trip: TripType,
  /// one-way or round-trip
  #[arg(long, default_value = "one-way")]
  mode: TripMode,
  #[arg(long, default_value_t = 0.0)]
  distance: f64,
  /// Hourly package for local trips, e.g. "8hrs-80km"
  #[arg(long)]
  package: Option<String>,
  /// Pickup time (RFC 3339)
  #[arg(long)]
  pickup: Option<DateTime<Utc>>,
}

impl RequestArgs {
  fn into_request(self) -> FareRequest {
    let mut request = FareRequest::new(self.vehicle, self.trip, self.distance).with_mode(self.mode);
    if let Some(package) = self.package {
      request = request.with_package(package);
    }
    if let Some(pickup) = self.pickup {
      request = request.with_pickup(pickup);
    }
    request
  }
}

fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("farecache")
    .join("logs");

  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    log_dir,
    "farecache.log",
  ));

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("farecache=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Stdout is reserved for command output
  let _guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Quote { request } => quote(&config, request.into_request()),
    command => run(FareEngine::new(config)?, command).await,
  }
}

fn quote(config: &Config, request: FareRequest) -> Result<()> {
  let table = FallbackPriceTable::with_overrides(&config.fallback, FareValidator::default())?;
  let fare = table.compute_fallback(
    &normalize_vehicle_id(&request.vehicle_id),
    request.trip_type,
    request.trip_mode,
    request.distance_km,
    request.package.as_deref(),
  )?;
  println!("{}", fare);
  Ok(())
}

async fn run(engine: FareEngine, command: Command) -> Result<()> {
  let resolver = engine.resolver();

  match command {
    Command::Resolve { request, refresh } => {
      let mut request = request.into_request();
      if refresh {
        request = request.forced();
      }
      let entry = resolver.resolve_entry(&request).await?;
      info!(key = %entry.key, fare = entry.fare, source = %entry.source, "Resolved");
      println!("{}\t{}", entry.fare, entry.source);
    }
    Command::Cached { request } => {
      println!("{}", resolver.get_cached_only(&request.into_request()));
    }
    Command::Confirm { request, fare } => {
      let validated = resolver.confirm(&request.into_request(), fare)?;
      println!(
        "{}\t{}\t{}",
        validated.vehicle_id, validated.trip_type, validated.fare
      );
    }
    Command::Release { vehicle, trip } => {
      resolver.release(&vehicle, trip)?;
    }
    Command::Clear { force } => {
      resolver.clear_all(force)?;
    }
    Command::Quote { request } => quote(engine.config(), request.into_request())?,
  }

  Ok(())
}
