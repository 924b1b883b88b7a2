//! # quota-reconcile
//!
//! Per-account quota enforcement for multi-tenant services whose tenants own
//! resources held by an external provider.
//!
//! Every account has plan limits (a maximum number of active resources and a
//! maximum number of usage minutes per usage window). When an administrator
//! lowers a limit, or an account drifts over its limits, the engine marks the
//! excess resources for deletion and converges the external provider to match:
//! marked resources are deleted at the provider and then expired locally.
//! Failed deletions stay marked and are retried by the next sweep.
//!
//! ## Quick Start
//!
//! ```rust
//! use quota_reconcile::infrastructure::mocks::MockProvider;
//! use quota_reconcile::application::ports::{AccountStore, ResourceStore};
//! use quota_reconcile::{
//!     Account, AccountId, ExternalId, InMemoryStore, LimitChange, QuotaEngine, Resource,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(InMemoryStore::new());
//! let engine = QuotaEngine::builder()
//!     .with_store(Arc::clone(&store))
//!     .with_provider(Arc::new(MockProvider::new()))
//!     .build()
//!     .unwrap();
//!
//! let now = chrono::Utc::now();
//! let account = AccountId::new("acct-1");
//! store.insert_account(Account::new(account.clone(), now)).unwrap();
//! for i in 0..3 {
//!     let created = now + chrono::Duration::seconds(i);
//!     let resource = Resource::new(
//!         format!("res-{i}").as_str(),
//!         account.clone(),
//!         Some(ExternalId::new(format!("ext-{i}"))),
//!         created,
//!     );
//!     store.insert_resource(resource).unwrap();
//! }
//!
//! // Lowering the resource limit to 1 marks the two newest resources and
//! // deletes them at the provider.
//! let report = engine
//!     .admin()
//!     .update_limits(&account, &LimitChange::by("ops@example.com").max_resources(1))
//!     .await
//!     .unwrap();
//! assert_eq!(report.change.resources_marked.len(), 2);
//! assert!(report.deletions.iter().all(|outcome| outcome.is_success()));
//! # }
//! ```
//!
//! ## Account Status
//!
//! Status is always derived by [`classify`]: suspended first, then the minute
//! limit, then the resource limit, then the 80% warning threshold. Monitoring
//! rows, sweeps and admission checks all go through it.
//!
//! ## Enforcement
//!
//! - **Limit changes** mark the newest active resources beyond the new resource
//!   limit with `AdminLimitReduction`. Suspending an account marks every
//!   active resource with `UserSuspended`.
//! - **Sweeps** visit every account, mark resources of accounts that are over
//!   a limit and reconcile both new and previously-marked resources. An
//!   account out of minutes has every active resource marked with
//!   `MinutesLimitExceeded`. Each sweep is recorded as an [`EnforcementRun`].
//! - **Resets** start a new usage window and reactivate marked resources,
//!   oldest first, within the resource limit.
//!
//! Changes to one account are serialized, and a resource is never deleted at
//! the provider by two tasks at once.
//!
//! ## Fail-Safe Operation
//!
//! Provider calls are bounded by a timeout and guarded by a circuit breaker.
//! While the circuit is open no provider calls are made and marked resources
//! simply wait for a later sweep:
//!
//! ```rust,no_run
//! # use quota_reconcile::{CircuitState, InMemoryStore, QuotaEngine};
//! # use quota_reconcile::infrastructure::mocks::MockProvider;
//! # use std::sync::Arc;
//! # let engine = QuotaEngine::builder()
//! #     .with_store(Arc::new(InMemoryStore::new()))
//! #     .with_provider(Arc::new(MockProvider::new()))
//! #     .build()
//! #     .unwrap();
//! match engine.circuit_breaker().state() {
//!     CircuitState::Closed => println!("Deleting normally"),
//!     CircuitState::Open => println!("Provider calls paused"),
//!     CircuitState::HalfOpen => println!("Probing the provider"),
//! }
//! ```
//!
//! ## Observability
//!
//! The engine logs through `tracing` and keeps counters of sweeps, marked
//! resources and deletion results:
//!
//! ```rust,no_run
//! # use quota_reconcile::{InMemoryStore, QuotaEngine};
//! # use quota_reconcile::infrastructure::mocks::MockProvider;
//! # use std::sync::Arc;
//! # let engine = QuotaEngine::builder()
//! #     .with_store(Arc::new(InMemoryStore::new()))
//! #     .with_provider(Arc::new(MockProvider::new()))
//! #     .build()
//! #     .unwrap();
//! let snapshot = engine.metrics();
//! println!("Sweeps: {}", snapshot.sweeps_completed);
//! println!("Deletion failure rate: {:.2}%", snapshot.deletion_failure_rate() * 100.0);
//! ```

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    account::{Account, AccountId, Actor, PlanLimits, Suspension},
    resource::{DeletionReason, ExternalId, LifecycleState, Resource, ResourceId},
    run::{DeletionOutcome, EnforcementRun, OutcomeStatus, RunCounts, RunId},
    selection::{select_excess, MarkPlan},
    status::{classify, AccountStatus},
    usage::{UsageEvent, UsageReport, UsageSnapshot},
};

pub use application::{
    admin::{
        AccountMonitoringRow, AccountQuery, AdminService, AdmissionDecision, AdmissionKind,
        EnforcementStatus, LimitUpdateReport, Page,
    },
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    error::EngineError,
    metrics::{Metrics, MetricsSnapshot},
    mutator::{EnforceOutcome, LimitChange, LimitOutcome, ResetOutcome, ValidationError},
    ports::{Clock, ProviderDeletion, ProviderError, QuotaStore, ResourceProvider, StoreError},
    reconciler::ReconcilerConfig,
    scheduler::{ShutdownError, SweepCancellation, SweepHandle},
};

pub use infrastructure::{
    clock::SystemClock,
    engine::{BuildError, EngineConfig, QuotaEngine, QuotaEngineBuilder},
    storage::InMemoryStore,
};

#[cfg(feature = "http-provider")]
pub use infrastructure::http::{HttpProviderConfig, HttpResourceProvider};
