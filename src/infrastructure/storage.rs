//! In-memory storage adapter.
//!
//! Provides a concurrent, sharded implementation of every persistence port.
//! Tables are DashMaps; multi-row writes (account commits and resource
//! expiry) are serialized by a single write lock so a commit is applied
//! entirely or not at all.

use crate::application::ports::{
    AccountCommit, AccountStore, AuditLog, ResourceStore, StoreError, UsageLog,
};
use crate::domain::account::{Account, AccountId};
use crate::domain::resource::{Resource, ResourceId};
use crate::domain::run::{DeletionOutcome, EnforcementRun, LimitChangeRecord};
use crate::domain::usage::UsageEvent;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe in-memory store backed by DashMap.
///
/// DashMap provides lock-free reads and fine-grained locking for writes, so
/// monitoring reads never wait on a sweep.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    accounts: DashMap<AccountId, Account>,
    resources: DashMap<ResourceId, Resource>,
    usage: DashMap<AccountId, Vec<UsageEvent>>,
    outcomes: DashMap<ResourceId, Vec<DeletionOutcome>>,
    changes: DashMap<AccountId, Vec<LimitChangeRecord>>,
    runs: Mutex<Vec<EnforcementRun>>,
    write_lock: Mutex<()>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn writer(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock.lock().map_err(poisoned)
    }

    /// Number of resources in every lifecycle state.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    fn staged(&self, id: &ResourceId, account_id: &AccountId) -> Result<Resource, StoreError> {
        let resource = self
            .resources
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::ResourceNotFound(id.clone()))?;
        if &resource.account_id != account_id {
            return Err(StoreError::ForeignResource {
                resource_id: id.clone(),
                account_id: account_id.clone(),
            });
        }
        Ok(resource)
    }
}

impl AccountStore for InMemoryStore {
    fn account(&self, id: &AccountId) -> Result<Account, StoreError> {
        self.accounts
            .get(id)
            .map(|a| a.value().clone())
            .ok_or_else(|| StoreError::AccountNotFound(id.clone()))
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.value().clone()).collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        match self.accounts.entry(account.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateAccount(account.id)),
            Entry::Vacant(slot) => {
                slot.insert(account);
                Ok(())
            }
        }
    }

    fn commit(&self, commit: AccountCommit) -> Result<Account, StoreError> {
        let _writer = self.writer()?;
        let account_id = commit.account.id.clone();

        let found = self
            .accounts
            .get(&account_id)
            .map(|a| a.revision)
            .ok_or_else(|| StoreError::AccountNotFound(account_id.clone()))?;
        if found != commit.expected_revision {
            return Err(StoreError::RevisionMismatch {
                account_id,
                expected: commit.expected_revision,
                found,
            });
        }

        // Stage every transition before touching any row.
        let mut staged = Vec::with_capacity(commit.marks.len() + commit.reactivations.len());
        for mark in &commit.marks {
            let mut resource = self.staged(&mark.resource_id, &account_id)?;
            resource.mark_for_deletion(mark.reason, &mark.actor, mark.at)?;
            staged.push(resource);
        }
        for id in &commit.reactivations {
            let mut resource = self.staged(id, &account_id)?;
            resource.reactivate()?;
            staged.push(resource);
        }

        for resource in staged {
            self.resources.insert(resource.id.clone(), resource);
        }
        if let Some(record) = commit.audit {
            self.changes
                .entry(account_id.clone())
                .or_default()
                .push(record);
        }

        let mut account = commit.account;
        account.revision = found + 1;
        self.accounts.insert(account_id, account.clone());
        Ok(account)
    }
}

impl ResourceStore for InMemoryStore {
    fn resource(&self, id: &ResourceId) -> Result<Resource, StoreError> {
        self.resources
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::ResourceNotFound(id.clone()))
    }

    fn insert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        if !self.accounts.contains_key(&resource.account_id) {
            return Err(StoreError::AccountNotFound(resource.account_id));
        }
        match self.resources.entry(resource.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateResource(resource.id)),
            Entry::Vacant(slot) => {
                slot.insert(resource);
                Ok(())
            }
        }
    }

    fn resources_for(&self, account_id: &AccountId) -> Result<Vec<Resource>, StoreError> {
        let mut resources: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| &r.account_id == account_id)
            .map(|r| r.value().clone())
            .collect();
        resources.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(resources)
    }

    fn expire_resource(&self, id: &ResourceId, at: DateTime<Utc>) -> Result<Resource, StoreError> {
        let _writer = self.writer()?;
        let mut resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| StoreError::ResourceNotFound(id.clone()))?;
        resource.expire(at)?;
        Ok(resource.value().clone())
    }
}

impl UsageLog for InMemoryStore {
    fn append_usage(&self, event: UsageEvent) -> Result<(), StoreError> {
        if !self.accounts.contains_key(&event.account_id) {
            return Err(StoreError::AccountNotFound(event.account_id));
        }
        self.usage
            .entry(event.account_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    fn usage_events(&self, account_id: &AccountId) -> Result<Vec<UsageEvent>, StoreError> {
        Ok(self
            .usage
            .get(account_id)
            .map(|events| events.value().clone())
            .unwrap_or_default())
    }
}

impl AuditLog for InMemoryStore {
    fn append_run(&self, run: EnforcementRun) -> Result<(), StoreError> {
        self.runs.lock().map_err(poisoned)?.push(run);
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<EnforcementRun>, StoreError> {
        let runs = self.runs.lock().map_err(poisoned)?;
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }

    fn append_outcome(&self, outcome: DeletionOutcome) -> Result<(), StoreError> {
        self.outcomes
            .entry(outcome.resource_id.clone())
            .or_default()
            .push(outcome);
        Ok(())
    }

    fn outcomes_for(&self, resource_id: &ResourceId) -> Result<Vec<DeletionOutcome>, StoreError> {
        Ok(self
            .outcomes
            .get(resource_id)
            .map(|o| o.value().clone())
            .unwrap_or_default())
    }

    fn changes_for(&self, account_id: &AccountId) -> Result<Vec<LimitChangeRecord>, StoreError> {
        Ok(self
            .changes
            .get(account_id)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }
}
