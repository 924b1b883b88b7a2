//! Circuit breaker for provider deletions.
//!
//! After a run of consecutive provider failures the circuit opens and the
//! reconciler stops calling the provider: marked resources simply stay
//! marked and the next sweep retries them. After the recovery timeout one
//! probe call is let through (half-open); its result closes or reopens the
//! circuit.
//!
//! Time is read through the [`Clock`] port, so recovery can be driven
//! deterministically in tests.

use crate::application::ports::Clock;
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Provider calls proceed normally
    Closed = 0,
    /// Provider calls are skipped
    Open = 1,
    /// A single probe call is allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive provider failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed
    #[serde(with = "secs")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Circuit breaker protecting the external provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Milliseconds since the Unix epoch of the failure that opened the circuit
    opened_at_millis: AtomicI64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker with default configuration.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(CircuitBreakerConfig::default(), clock)
    }

    /// Create a breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicI64::new(0),
            config,
            clock,
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a provider call may be issued now.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                let elapsed = self.clock.now().timestamp_millis().saturating_sub(opened_at);
                let timeout = i64::try_from(self.config.recovery_timeout.as_millis())
                    .unwrap_or(i64::MAX);

                if elapsed < timeout {
                    return false;
                }

                // Exactly one caller wins the transition and gets to probe.
                self.state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            }
        }
    }

    /// Record a provider call that reached a definitive answer.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
    }

    /// Record a provider call that failed or timed out.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        let should_open = match self.state() {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            self.opened_at_millis
                .store(self.clock.now().timestamp_millis(), Ordering::Release);
            self.state.store(CircuitState::Open as u8, Ordering::Release);
        }
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        self.record_success();
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
