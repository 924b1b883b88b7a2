//! Store wrapper with switchable failures.

use crate::application::ports::{
    AccountCommit, AccountStore, AuditLog, ResourceStore, StoreError, UsageLog,
};
use crate::application::scheduler::SweepCancellation;
use crate::domain::account::{Account, AccountId};
use crate::domain::resource::{Resource, ResourceId};
use crate::domain::run::{DeletionOutcome, EnforcementRun, LimitChangeRecord};
use crate::domain::usage::UsageEvent;
use crate::infrastructure::storage::InMemoryStore;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// An [`InMemoryStore`] whose operations can be made to fail on demand.
///
/// Failures surface as [`StoreError::Unavailable`]. Seed data through
/// [`FlakyStore::inner`] to bypass the switches.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    fail_listing: AtomicBool,
    fail_expire: AtomicBool,
    fail_append_run: AtomicBool,
    fail_commit: AtomicBool,
    broken_accounts: DashSet<AccountId>,
    broken_resources: DashSet<ResourceId>,
    cancel_on_commit: DashMap<AccountId, SweepCancellation>,
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} failed (injected)"))
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, unaffected by the failure switches.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Fail `accounts()`.
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Fail `expire_resource()`.
    pub fn fail_expire(&self, fail: bool) {
        self.fail_expire.store(fail, Ordering::SeqCst);
    }

    /// Fail `append_run()`.
    pub fn fail_append_run(&self, fail: bool) {
        self.fail_append_run.store(fail, Ordering::SeqCst);
    }

    /// Fail `commit()`.
    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Fail every per-account read for `account_id`.
    pub fn fail_account(&self, account_id: &AccountId) {
        self.broken_accounts.insert(account_id.clone());
    }

    /// Undo [`FlakyStore::fail_account`].
    pub fn heal_account(&self, account_id: &AccountId) {
        self.broken_accounts.remove(account_id);
    }

    /// Fail `resource()` for `resource_id`.
    pub fn fail_resource(&self, resource_id: &ResourceId) {
        self.broken_resources.insert(resource_id.clone());
    }

    /// Fire `cancel` once a commit for `account_id` lands.
    pub fn cancel_on_commit(&self, account_id: &AccountId, cancel: &SweepCancellation) {
        self.cancel_on_commit
            .insert(account_id.clone(), cancel.clone());
    }

    fn check_account(&self, account_id: &AccountId) -> Result<(), StoreError> {
        if self.broken_accounts.contains(account_id) {
            return Err(unavailable("account read"));
        }
        Ok(())
    }
}

impl AccountStore for FlakyStore {
    fn account(&self, id: &AccountId) -> Result<Account, StoreError> {
        self.check_account(id)?;
        self.inner.account(id)
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(unavailable("account listing"));
        }
        self.inner.accounts()
    }

    fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        self.inner.insert_account(account)
    }

    fn commit(&self, commit: AccountCommit) -> Result<Account, StoreError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(unavailable("commit"));
        }
        let account_id = commit.account.id.clone();
        let committed = self.inner.commit(commit)?;
        if let Some((_, cancel)) = self.cancel_on_commit.remove(&account_id) {
            cancel.cancel();
        }
        Ok(committed)
    }
}

impl ResourceStore for FlakyStore {
    fn resource(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        if self.broken_resources.contains(id) {
            return Err(unavailable("resource read"));
        }
        self.inner.resource(id)
    }

    fn insert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        self.inner.insert_resource(resource)
    }

    fn resources_for(&self, account_id: &AccountId) -> Result<Vec<Resource>, StoreError> {
        self.check_account(account_id)?;
        self.inner.resources_for(account_id)
    }

    fn expire_resource(&self, id: &ResourceId, at: DateTime<Utc>) -> Result<Resource, StoreError> {
        if self.fail_expire.load(Ordering::SeqCst) {
            return Err(unavailable("expire"));
        }
        self.inner.expire_resource(id, at)
    }
}

impl UsageLog for FlakyStore {
    fn append_usage(&self, event: UsageEvent) -> Result<(), StoreError> {
        self.inner.append_usage(event)
    }

    fn usage_events(&self, account_id: &AccountId) -> Result<Vec<UsageEvent>, StoreError> {
        self.check_account(account_id)?;
        self.inner.usage_events(account_id)
    }
}

impl AuditLog for FlakyStore {
    fn append_run(&self, run: EnforcementRun) -> Result<(), StoreError> {
        if self.fail_append_run.load(Ordering::SeqCst) {
            return Err(unavailable("run append"));
        }
        self.inner.append_run(run)
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<EnforcementRun>, StoreError> {
        self.inner.recent_runs(limit)
    }

    fn append_outcome(&self, outcome: DeletionOutcome) -> Result<(), StoreError> {
        self.inner.append_outcome(outcome)
    }

    fn outcomes_for(&self, resource_id: &ResourceId) -> Result<Vec<DeletionOutcome>, StoreError> {
        self.inner.outcomes_for(resource_id)
    }

    fn changes_for(&self, account_id: &AccountId) -> Result<Vec<LimitChangeRecord>, StoreError> {
        self.inner.changes_for(account_id)
    }
}
