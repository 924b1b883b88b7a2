//! Engine assembly.
//!
//! [`QuotaEngine`] wires the store, the provider and the clock into the
//! application services and shares the per-resource lock table, metrics and
//! circuit breaker between them. Construct it with [`QuotaEngine::builder`].

use crate::application::admin::{AdminService, DEFAULT_RECENT_RUNS};
use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::error::EngineError;
use crate::application::locks::LockTable;
use crate::application::metrics::{Metrics, MetricsSnapshot};
use crate::application::mutator::{LimitChange, LimitMutator, LimitOutcome};
use crate::application::ports::{Clock, QuotaStore, ResourceProvider};
use crate::application::reconciler::{DeletionReconciler, ReconcilerConfig};
use crate::application::scheduler::{EnforcementScheduler, SweepHandle};
use crate::domain::account::{AccountId, Actor};
use crate::domain::resource::ResourceId;
use crate::domain::run::{DeletionOutcome, EnforcementRun};
use crate::domain::usage::UsageSnapshot;
use crate::infrastructure::clock::SystemClock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Error returned by [`QuotaEngineBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("a store is required")]
    MissingStore,
    #[error("a resource provider is required")]
    MissingProvider,
    #[error("delete_timeout must be greater than 0")]
    ZeroDeleteTimeout,
    #[error("max_parallel_deletions must be greater than 0")]
    ZeroParallelism,
    #[error("circuit breaker failure_threshold must be greater than 0")]
    ZeroFailureThreshold,
    #[error("recent_runs must be greater than 0")]
    ZeroRecentRuns,
    #[error("sweep_interval_secs must be greater than 0")]
    ZeroSweepInterval,
}

/// Tunables of the engine.
///
/// Every field has a default, so a partial document is enough:
///
/// ```
/// use quota_reconcile::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{
///     "delete_timeout_ms": 2500,
///     "circuit_breaker": { "failure_threshold": 3 }
/// }"#).unwrap();
/// assert_eq!(config.reconciler.delete_timeout.as_millis(), 2500);
/// assert_eq!(config.reconciler.max_parallel_deletions, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub reconciler: ReconcilerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Runs returned by the enforcement status view
    pub recent_runs: usize,
    /// Period of scheduled sweeps
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            recent_runs: DEFAULT_RECENT_RUNS,
            sweep_interval_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.reconciler.delete_timeout.is_zero() {
            return Err(BuildError::ZeroDeleteTimeout);
        }
        if self.reconciler.max_parallel_deletions == 0 {
            return Err(BuildError::ZeroParallelism);
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }
        if self.recent_runs == 0 {
            return Err(BuildError::ZeroRecentRuns);
        }
        if self.sweep_interval_secs == 0 {
            return Err(BuildError::ZeroSweepInterval);
        }
        Ok(())
    }
}

/// Builder for constructing a [`QuotaEngine`].
pub struct QuotaEngineBuilder<S>
where
    S: QuotaStore,
{
    store: Option<Arc<S>>,
    provider: Option<Arc<dyn ResourceProvider>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl<S> QuotaEngineBuilder<S>
where
    S: QuotaStore,
{
    /// Set the persistence backend.
    pub fn with_store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the external provider resources are deleted from.
    pub fn with_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Upper bound on one provider call.
    ///
    /// The value will be validated when `build()` is called.
    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.config.reconciler.delete_timeout = timeout;
        self
    }

    /// Provider calls allowed in flight at once.
    pub fn with_max_parallel_deletions(mut self, max: usize) -> Self {
        self.config.reconciler.max_parallel_deletions = max;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Runs returned by the enforcement status view.
    pub fn with_recent_runs(mut self, recent_runs: usize) -> Self {
        self.config.recent_runs = recent_runs;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval_secs = interval.as_secs();
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    /// Returns `BuildError` if a required part is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<QuotaEngine<S>, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let provider = self.provider.ok_or(BuildError::MissingProvider)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let metrics = Metrics::new();
        let resource_locks = LockTable::new();
        let breaker = Arc::new(CircuitBreaker::with_config(
            self.config.circuit_breaker.clone(),
            Arc::clone(&clock),
        ));

        let mutator = Arc::new(LimitMutator::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            resource_locks.clone(),
            metrics.clone(),
        ));
        let reconciler = Arc::new(DeletionReconciler::new(
            Arc::clone(&store),
            provider,
            Arc::clone(&clock),
            resource_locks,
            breaker,
            metrics.clone(),
            self.config.reconciler.clone(),
        ));
        let scheduler = Arc::new(EnforcementScheduler::new(
            Arc::clone(&store),
            Arc::clone(&mutator),
            Arc::clone(&reconciler),
            Arc::clone(&clock),
            metrics.clone(),
        ));
        let admin = AdminService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&mutator),
            Arc::clone(&reconciler),
            Arc::clone(&scheduler),
            self.config.recent_runs,
        );

        Ok(QuotaEngine {
            store,
            metrics,
            mutator,
            reconciler,
            scheduler,
            admin,
            config: self.config,
        })
    }
}

/// The assembled quota enforcement engine.
pub struct QuotaEngine<S>
where
    S: QuotaStore,
{
    store: Arc<S>,
    metrics: Metrics,
    mutator: Arc<LimitMutator<S>>,
    reconciler: Arc<DeletionReconciler<S>>,
    scheduler: Arc<EnforcementScheduler<S>>,
    admin: AdminService<S>,
    config: EngineConfig,
}

impl<S> QuotaEngine<S>
where
    S: QuotaStore,
{
    /// Create a builder for configuring the engine.
    ///
    /// Defaults:
    /// - Clock: system clock
    /// - Delete timeout: 10 seconds, 8 deletions in parallel
    /// - Circuit breaker: opens after 5 consecutive failures, probes after 30 seconds
    /// - Recent runs: 10
    /// - Sweep interval: 5 minutes
    pub fn builder() -> QuotaEngineBuilder<S> {
        QuotaEngineBuilder {
            store: None,
            provider: None,
            clock: None,
            config: EngineConfig::default(),
        }
    }

    /// Operator-facing operations.
    pub fn admin(&self) -> &AdminService<S> {
        &self.admin
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The circuit breaker guarding provider calls.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        self.reconciler.circuit_breaker()
    }

    pub fn compute_usage(&self, account_id: &AccountId) -> Result<UsageSnapshot, EngineError> {
        self.mutator.aggregator().compute_usage(account_id)
    }

    /// Apply a limit change without reconciling. See
    /// [`AdminService::update_limits`] for the reconciling variant.
    pub async fn apply_limits(
        &self,
        account_id: &AccountId,
        change: &LimitChange,
    ) -> Result<LimitOutcome, EngineError> {
        self.mutator.apply_limits(account_id, change).await
    }

    /// Reconcile a batch of marked resources.
    pub async fn reconcile(&self, resources: &[ResourceId]) -> Vec<DeletionOutcome> {
        self.reconciler.reconcile(resources).await
    }

    /// Run one sweep to completion.
    pub async fn run_sweep(&self, initiator: &Actor) -> Result<EnforcementRun, EngineError> {
        self.scheduler.run_sweep(initiator).await
    }

    /// Start periodic sweeps at the configured interval.
    pub fn start_sweeps(&self, initiator: Actor) -> SweepHandle {
        Arc::clone(&self.scheduler).start(self.config.sweep_interval(), initiator)
    }

    pub fn scheduler(&self) -> &Arc<EnforcementScheduler<S>> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockProvider;
    use crate::infrastructure::storage::InMemoryStore;

    fn builder() -> QuotaEngineBuilder<InMemoryStore> {
        QuotaEngine::builder()
            .with_store(Arc::new(InMemoryStore::new()))
            .with_provider(Arc::new(MockProvider::new()))
    }

    #[test]
    fn test_builder_defaults() {
        let engine = builder().build().unwrap();
        assert_eq!(engine.config(), &EngineConfig::default());
        assert_eq!(engine.metrics().sweeps_completed, 0);
    }

    #[test]
    fn test_builder_requires_parts() {
        let err = QuotaEngine::<InMemoryStore>::builder()
            .with_provider(Arc::new(MockProvider::new()))
            .build()
            .err();
        assert_eq!(err, Some(BuildError::MissingStore));

        let err = QuotaEngine::builder()
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
            .err();
        assert_eq!(err, Some(BuildError::MissingProvider));
    }

    #[test]
    fn test_builder_validates_config() {
        assert_eq!(
            builder().with_delete_timeout(Duration::ZERO).build().err(),
            Some(BuildError::ZeroDeleteTimeout)
        );
        assert_eq!(
            builder().with_max_parallel_deletions(0).build().err(),
            Some(BuildError::ZeroParallelism)
        );
        assert_eq!(
            builder()
                .with_circuit_breaker(CircuitBreakerConfig {
                    failure_threshold: 0,
                    ..Default::default()
                })
                .build()
                .err(),
            Some(BuildError::ZeroFailureThreshold)
        );
        assert_eq!(
            builder().with_recent_runs(0).build().err(),
            Some(BuildError::ZeroRecentRuns)
        );
        assert_eq!(
            builder()
                .with_sweep_interval(Duration::from_millis(500))
                .build()
                .err(),
            Some(BuildError::ZeroSweepInterval)
        );
    }

    #[test]
    fn test_config_from_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "delete_timeout_ms": 1500,
                "max_parallel_deletions": 2,
                "circuit_breaker": {"failure_threshold": 3, "recovery_timeout": 60},
                "recent_runs": 25,
                "sweep_interval_secs": 60
            }"#,
        )
        .unwrap();

        assert_eq!(config.reconciler.delete_timeout, Duration::from_millis(1500));
        assert_eq!(config.reconciler.max_parallel_deletions, 2);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.recent_runs, 25);
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }
}
