//! Usage aggregation.
//!
//! Usage is never stored as a running counter. It is summed on read from
//! the append-only usage log, windowed by the account's reset watermark,
//! and combined with the count of active resources.

use crate::application::error::EngineError;
use crate::application::ports::{Clock, QuotaStore, StoreError};
use crate::domain::account::{Account, AccountId};
use crate::domain::resource::Resource;
use crate::domain::usage::{sum_window, UsageSnapshot};
use std::sync::Arc;

/// Computes usage snapshots from the usage log and resource table.
///
/// Read-only: neither the log nor the resource table is ever mutated here.
pub struct UsageAggregator<S>
where
    S: QuotaStore,
{
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> UsageAggregator<S>
where
    S: QuotaStore,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current usage of one account. Zero events yield zero usage.
    pub fn compute_usage(&self, account_id: &AccountId) -> Result<UsageSnapshot, EngineError> {
        let account = self.store.account(account_id)?;
        let resources = self.store.resources_for(account_id)?;
        Ok(self.snapshot_for(&account, &resources)?)
    }

    /// Usage for an account whose row and resources are already loaded.
    pub(crate) fn snapshot_for(
        &self,
        account: &Account,
        resources: &[Resource],
    ) -> Result<UsageSnapshot, StoreError> {
        let events = self.store.usage_events(&account.id)?;
        let usage_seconds = sum_window(&events, account.usage_reset_at, self.clock.now());
        let active = resources.iter().filter(|r| r.is_active()).count();

        Ok(UsageSnapshot::new(
            usage_seconds,
            u32::try_from(active).unwrap_or(u32::MAX),
        ))
    }
}

impl<S> Clone for UsageAggregator<S>
where
    S: QuotaStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}
