//! Observability metrics for enforcement.
//!
//! Provides counters about sweeps and deletions for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking enforcement statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    sweeps_completed: AtomicU64,
    resources_marked: AtomicU64,
    deletions_succeeded: AtomicU64,
    deletions_failed: AtomicU64,
    account_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_sweep(&self) {
        self.inner.sweeps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_marked(&self, count: usize) {
        self.inner
            .resources_marked
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_deletion(&self, success: bool) {
        let counter = if success {
            &self.inner.deletions_succeeded
        } else {
            &self.inner.deletions_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_account_failure(&self) {
        self.inner.account_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed sweeps (including empty ones).
    pub fn sweeps_completed(&self) -> u64 {
        self.inner.sweeps_completed.load(Ordering::Relaxed)
    }

    /// Resources moved to `MarkedForDeletion`.
    pub fn resources_marked(&self) -> u64 {
        self.inner.resources_marked.load(Ordering::Relaxed)
    }

    /// Resources that reached `Expired`.
    pub fn deletions_succeeded(&self) -> u64 {
        self.inner.deletions_succeeded.load(Ordering::Relaxed)
    }

    /// Deletion attempts that left the resource marked.
    pub fn deletions_failed(&self) -> u64 {
        self.inner.deletions_failed.load(Ordering::Relaxed)
    }

    /// Accounts whose processing failed inside a sweep.
    pub fn account_failures(&self) -> u64 {
        self.inner.account_failures.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sweeps_completed: self.sweeps_completed(),
            resources_marked: self.resources_marked(),
            deletions_succeeded: self.deletions_succeeded(),
            deletions_failed: self.deletions_failed(),
            account_failures: self.account_failures(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.sweeps_completed.store(0, Ordering::Relaxed);
        self.inner.resources_marked.store(0, Ordering::Relaxed);
        self.inner.deletions_succeeded.store(0, Ordering::Relaxed);
        self.inner.deletions_failed.store(0, Ordering::Relaxed);
        self.inner.account_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sweeps_completed: u64,
    pub resources_marked: u64,
    pub deletions_succeeded: u64,
    pub deletions_failed: u64,
    pub account_failures: u64,
}

impl MetricsSnapshot {
    /// Share of deletion attempts that failed (0.0 to 1.0).
    ///
    /// Returns 0.0 if no deletion has been attempted.
    pub fn deletion_failure_rate(&self) -> f64 {
        let total = self.deletion_attempts();
        if total == 0 {
            0.0
        } else {
            self.deletions_failed as f64 / total as f64
        }
    }

    /// Total deletion attempts (succeeded + failed).
    pub fn deletion_attempts(&self) -> u64 {
        self.deletions_succeeded.saturating_add(self.deletions_failed)
    }
}
