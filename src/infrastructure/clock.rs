//! Wall-clock time source.
//!
//! Usage windows, mark timestamps and run records are all stamped in UTC
//! through the [`Clock`] port. Tests substitute `MockClock` from
//! `crate::infrastructure::mocks` (enabled by the `test-helpers` feature).

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};

/// Reads the host's UTC wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
