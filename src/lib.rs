//! Fare resolution and caching for taxi booking clients.
//!
//! A fare request goes through a cascade of tiers (confirmed fares, an
//! in-process cache, a durable store, the remote fare API and finally a
//! static fallback table) and always comes back with a plausible number
//! unless the request itself is malformed.

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fare;
pub mod gateway;
pub mod throttle;

pub use engine::FareEngine;
pub use error::FareError;
pub use fare::types::{FareRequest, FareSource, TripMode, TripType};
