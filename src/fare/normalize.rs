//! Canonical vehicle and package identifiers.
//!
//! Everything here is pure and idempotent: normalizing an already
//! normalized id returns it unchanged.

use std::fmt;

/// Vehicle ids that are spelled many ways by different screens.
const VEHICLE_SYNONYMS: &[(&str, &str)] = &[
  ("hycross", "innova_hycross"),
  ("hi-cross", "innova_hycross"),
  ("hi_cross", "innova_hycross"),
  ("crysta", "innova_crysta"),
  ("tempo", "tempo_traveller"),
];

/// Ids that only map when they match exactly.
const VEHICLE_EXACT: &[(&str, &str)] = &[("mpv", "innova_hycross")];

/// The three hourly packages offered for local trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HourlyPackage {
  FourHours,
  EightHours,
  TenHours,
}

impl HourlyPackage {
  pub const DEFAULT: HourlyPackage = HourlyPackage::EightHours;

  pub fn as_str(&self) -> &'static str {
    match self {
      HourlyPackage::FourHours => "4hrs-40km",
      HourlyPackage::EightHours => "8hrs-80km",
      HourlyPackage::TenHours => "10hrs-100km",
    }
  }
}

impl fmt::Display for HourlyPackage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Lower-case, trim, and join whitespace runs with underscores.
fn canonical_text(raw: &str) -> String {
  raw
    .split_whitespace()
    .collect::<Vec<_>>()
    .join("_")
    .to_lowercase()
}

pub fn normalize_vehicle_id(raw: &str) -> String {
  let id = canonical_text(raw);

  if let Some((_, mapped)) = VEHICLE_EXACT.iter().find(|(alias, _)| *alias == id) {
    return (*mapped).to_string();
  }

  VEHICLE_SYNONYMS
    .iter()
    .find(|(needle, _)| id.contains(needle))
    .map(|(_, mapped)| (*mapped).to_string())
    .unwrap_or(id)
}

const PACKAGE_UNITS: &[&str] = &["h", "hr", "hrs", "hour", "hours", "km", "kms"];

/// Classify free text into one of the hourly packages.
///
/// Returns `None` when the text names no known package; callers that need
/// an id anyway use `normalize_package_id`, which falls back to 8hrs-80km.
pub fn classify_package(raw: &str) -> Option<HourlyPackage> {
  let text = canonical_text(raw);

  let start = text.find(|c: char| c.is_ascii_digit())?;
  let rest = &text[start..];
  let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
  let (digits, after) = rest.split_at(digits_end);

  // The number must be followed by its unit, e.g. "4hrs", "8_hours", "100-km"
  let unit: String = after
    .trim_start_matches(|c| c == '_' || c == '-')
    .chars()
    .take_while(|c| c.is_ascii_alphabetic())
    .collect();
  if !PACKAGE_UNITS.contains(&unit.as_str()) {
    return None;
  }

  match digits {
    "4" | "40" => Some(HourlyPackage::FourHours),
    "8" | "80" => Some(HourlyPackage::EightHours),
    "10" | "100" => Some(HourlyPackage::TenHours),
    _ => None,
  }
}

pub fn normalize_package_id(raw: &str) -> String {
  classify_package(raw)
    .unwrap_or(HourlyPackage::DEFAULT)
    .as_str()
    .to_string()
}
