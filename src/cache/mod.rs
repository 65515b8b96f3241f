//! Fare cache tiers.
//!
//! - `VolatileFareCache`: in-process TTL map, the fastest path
//! - `DurableFareStore`: fares and confirmed fares that survive a restart
//! - `KeyValueStore`: the storage contract the durable tier is built on

mod durable;
mod storage;
mod volatile;

pub use durable::DurableFareStore;
pub use storage::{KeyValueStore, SqliteStorage};
pub use volatile::VolatileFareCache;
