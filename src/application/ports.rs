//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::account::{Account, AccountId, Actor};
use crate::domain::resource::{DeletionReason, ExternalId, Resource, ResourceId, TransitionError};
use crate::domain::run::{DeletionOutcome, EnforcementRun, LimitChangeRecord};
use crate::domain::usage::UsageEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

/// Port for obtaining current time.
///
/// Usage windows, audit timestamps and the circuit breaker's recovery
/// timeout all read time through this port so tests can drive it.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Error returned by storage adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backing store cannot be reached or is otherwise unusable
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),
    #[error("resource {0} already exists")]
    DuplicateResource(ResourceId),
    #[error("account {0} already exists")]
    DuplicateAccount(AccountId),
    /// Another writer committed to the account since it was read
    #[error("account {account_id} changed concurrently (expected revision {expected}, found {found})")]
    RevisionMismatch {
        account_id: AccountId,
        expected: u64,
        found: u64,
    },
    #[error("resource {resource_id} does not belong to account {account_id}")]
    ForeignResource {
        resource_id: ResourceId,
        account_id: AccountId,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// A request to mark one resource, applied as part of an [`AccountCommit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMark {
    pub resource_id: ResourceId,
    pub reason: DeletionReason,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// An all-or-nothing change to one account and its resources.
///
/// Adapters must apply every part or none of it, and must reject the commit
/// with [`StoreError::RevisionMismatch`] when the stored revision differs
/// from `expected_revision`.
#[derive(Debug, Clone)]
pub struct AccountCommit {
    /// The new account row; its `revision` is assigned by the store
    pub account: Account,
    pub expected_revision: u64,
    pub marks: Vec<ResourceMark>,
    /// Marked resources to move back to `Active`
    pub reactivations: Vec<ResourceId>,
    pub audit: Option<LimitChangeRecord>,
}

impl AccountCommit {
    /// A commit that only rewrites the account row.
    pub fn new(account: Account, expected_revision: u64) -> Self {
        Self {
            account,
            expected_revision,
            marks: Vec::new(),
            reactivations: Vec::new(),
            audit: None,
        }
    }
}

/// Port for the account table.
pub trait AccountStore: Send + Sync + Debug {
    /// Load one account.
    fn account(&self, id: &AccountId) -> Result<Account, StoreError>;

    /// Load every account, ordered by id.
    fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Insert a new account.
    fn insert_account(&self, account: Account) -> Result<(), StoreError>;

    /// Apply a commit atomically and return the stored account.
    fn commit(&self, commit: AccountCommit) -> Result<Account, StoreError>;
}

/// Port for the resource table.
pub trait ResourceStore: Send + Sync + Debug {
    fn resource(&self, id: &ResourceId) -> Result<Resource, StoreError>;

    fn insert_resource(&self, resource: Resource) -> Result<(), StoreError>;

    /// All resources of an account in every lifecycle state, oldest first.
    fn resources_for(&self, account_id: &AccountId) -> Result<Vec<Resource>, StoreError>;

    /// Move a marked resource to `Expired`.
    fn expire_resource(
        &self,
        id: &ResourceId,
        at: DateTime<Utc>,
    ) -> Result<Resource, StoreError>;
}

/// Port for the append-only usage event log.
pub trait UsageLog: Send + Sync + Debug {
    fn append_usage(&self, event: UsageEvent) -> Result<(), StoreError>;

    fn usage_events(&self, account_id: &AccountId) -> Result<Vec<UsageEvent>, StoreError>;
}

/// Port for the append-only audit log.
pub trait AuditLog: Send + Sync + Debug {
    fn append_run(&self, run: EnforcementRun) -> Result<(), StoreError>;

    /// Most recent runs first.
    fn recent_runs(&self, limit: usize) -> Result<Vec<EnforcementRun>, StoreError>;

    fn append_outcome(&self, outcome: DeletionOutcome) -> Result<(), StoreError>;

    fn outcomes_for(&self, resource_id: &ResourceId) -> Result<Vec<DeletionOutcome>, StoreError>;

    fn changes_for(&self, account_id: &AccountId) -> Result<Vec<LimitChangeRecord>, StoreError>;
}

/// Everything the engine needs from persistence.
pub trait QuotaStore: AccountStore + ResourceStore + UsageLog + AuditLog + 'static {}

impl<T> QuotaStore for T where T: AccountStore + ResourceStore + UsageLog + AuditLog + 'static {}

/// Successful answer from the provider's delete operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderDeletion {
    /// The provider removed the resource
    Deleted,
    /// The provider has no such resource
    NotFound,
}

/// Error returned by the provider's delete operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Transport-level failure (DNS, connection reset, TLS, ...)
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    /// The provider answered with a non-success status other than not-found
    #[error("provider rejected deletion: {status}: {body}")]
    Rejected { status: u16, body: String },
    /// Calls are suspended after repeated failures
    #[error("provider circuit open, deletion deferred")]
    CircuitOpen,
}

/// Port for the external provider that holds the mirrored resources.
///
/// Only the delete operation is consumed.
#[async_trait]
pub trait ResourceProvider: Send + Sync + Debug {
    /// Delete one resource by its external id.
    async fn delete_resource(
        &self,
        external_id: &ExternalId,
    ) -> Result<ProviderDeletion, ProviderError>;
}
