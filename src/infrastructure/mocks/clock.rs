//! Mock clock for testing.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// A UTC clock that only moves when a test moves it.
///
/// Usage windows, mark timestamps and circuit breaker recovery all read the
/// [`Clock`] port, so a test can place events exactly on a window boundary:
///
/// ```
/// use quota_reconcile::infrastructure::mocks::MockClock;
/// use quota_reconcile::application::ports::Clock;
/// use chrono::{TimeZone, Utc};
/// use std::time::Duration;
///
/// let reset_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let clock = MockClock::new(reset_at);
/// assert_eq!(clock.now(), reset_at);
///
/// clock.advance(Duration::from_secs(90));
/// assert_eq!(clock.now(), reset_at + chrono::Duration::seconds(90));
/// ```
///
/// Clones share one instant: advancing any clone moves all of them.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    fn current(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: std::time::Duration) {
        let step = chrono::Duration::from_std(duration)
            .expect("MockClock advance out of range for chrono::Duration");
        *self.current() += step;
    }

    /// Jump to `instant`, forwards or backwards.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current() = instant;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current()
    }
}
