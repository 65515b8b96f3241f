//! Wall-clock time for cache timestamps.
//!
//! Every tier stamps and expires entries against one `Clock`. It reads the
//! wall clock once and then advances with `tokio::time::Instant`, so the
//! durable tier ages in step with the volatile one, and paused-time tests
//! can move both.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
  wall: DateTime<Utc>,
  instant: Instant,
}

impl Clock {
  pub fn new() -> Self {
    Self {
      wall: Utc::now(),
      instant: Instant::now(),
    }
  }

  pub fn now(&self) -> DateTime<Utc> {
    chrono::Duration::from_std(self.instant.elapsed())
      .ok()
      .and_then(|elapsed| self.wall.checked_add_signed(elapsed))
      .unwrap_or_else(Utc::now)
  }
}

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}
