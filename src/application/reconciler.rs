//! Deletion reconciliation.
//!
//! Converges the provider with local state for resources already marked
//! for deletion. Each resource is handled under its own async lock and its
//! state is re-read under that lock. The provider call itself runs under a
//! lock on the external id, so resources sharing one never race at the
//! provider. The provider is called at most once per resource per invocation. Nothing is retried inline: a failure leaves
//! the resource marked and the next sweep picks it up again.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::locks::LockTable;
use crate::application::metrics::Metrics;
use crate::application::ports::{
    Clock, ProviderDeletion, ProviderError, QuotaStore, ResourceProvider, StoreError,
};
use crate::domain::account::AccountId;
use crate::domain::resource::{ExternalId, Resource, ResourceId};
use crate::domain::run::{DeletionOutcome, OutcomeStatus};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Limits applied to provider calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Upper bound on a single provider call; exceeding it is a failure
    #[serde(rename = "delete_timeout_ms", with = "millis")]
    pub delete_timeout: Duration,
    /// Provider calls in flight at once
    pub max_parallel_deletions: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            delete_timeout: Duration::from_secs(10),
            max_parallel_deletions: 8,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Removes marked resources from the provider and expires them locally.
pub struct DeletionReconciler<S>
where
    S: QuotaStore,
{
    store: Arc<S>,
    provider: Arc<dyn ResourceProvider>,
    clock: Arc<dyn Clock>,
    resource_locks: LockTable<ResourceId>,
    external_locks: LockTable<ExternalId>,
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
    config: ReconcilerConfig,
}

impl<S> DeletionReconciler<S>
where
    S: QuotaStore,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<dyn ResourceProvider>,
        clock: Arc<dyn Clock>,
        resource_locks: LockTable<ResourceId>,
        breaker: Arc<CircuitBreaker>,
        metrics: Metrics,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            resource_locks,
            external_locks: LockTable::new(),
            breaker,
            metrics,
            config,
        }
    }

    /// Reconcile a batch of resources.
    ///
    /// Duplicates are collapsed. Resources that are already expired, or no
    /// longer marked, produce no outcome and no provider call. A resource
    /// that cannot be read produces a failed outcome. Outcomes are returned
    /// in batch order.
    #[tracing::instrument(skip_all, fields(batch = resources.len()))]
    pub async fn reconcile(&self, resources: &[ResourceId]) -> Vec<DeletionOutcome> {
        let mut seen = HashSet::new();
        let batch: Vec<ResourceId> = resources
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        let outcomes: Vec<Option<DeletionOutcome>> = stream::iter(batch)
            .map(|id| self.reconcile_one(id))
            .buffered(self.config.max_parallel_deletions.max(1))
            .collect()
            .await;

        outcomes.into_iter().flatten().collect()
    }

    async fn reconcile_one(&self, id: ResourceId) -> Option<DeletionOutcome> {
        let _guard = self.resource_locks.lock(id.clone()).await;

        let resource = match self.store.resource(&id) {
            Ok(resource) => resource,
            Err(StoreError::ResourceNotFound(_)) => {
                tracing::debug!(resource_id = %id, "Resource vanished before reconciliation");
                return None;
            }
            Err(err) => {
                let outcome = DeletionOutcome {
                    resource_id: id,
                    account_id: None,
                    external_id: None,
                    reason: None,
                    status: OutcomeStatus::Failed {
                        error: format!("could not load resource: {err}"),
                    },
                    recorded_at: self.clock.now(),
                };
                return Some(self.finish(outcome));
            }
        };
        if !resource.is_marked() {
            tracing::debug!(resource_id = %id, state = %resource.state, "Not marked, skipping");
            return None;
        }

        let status = match &resource.external_id {
            None => self.expire(&resource, OutcomeStatus::NoExternalResource),
            Some(external_id) => {
                let _external = self.external_locks.lock(external_id.clone()).await;
                match self.call_provider(external_id).await {
                    Ok(ProviderDeletion::Deleted) => {
                        self.expire(&resource, OutcomeStatus::Deleted)
                    }
                    Ok(ProviderDeletion::NotFound) => {
                        self.expire(&resource, OutcomeStatus::AlreadyAbsent)
                    }
                    Err(err) => OutcomeStatus::Failed {
                        error: err.to_string(),
                    },
                }
            }
        };

        Some(self.finish(DeletionOutcome {
            resource_id: resource.id.clone(),
            account_id: Some(resource.account_id.clone()),
            external_id: resource.external_id.clone(),
            reason: resource.deletion_reason,
            status,
            recorded_at: self.clock.now(),
        }))
    }

    /// Count, log and persist one outcome.
    fn finish(&self, outcome: DeletionOutcome) -> DeletionOutcome {
        self.metrics.record_deletion(outcome.is_success());
        let account_id = outcome.account_id.as_ref().map(AccountId::as_str);
        match &outcome.status {
            OutcomeStatus::Failed { error } => tracing::warn!(
                resource_id = %outcome.resource_id,
                account_id,
                error = %error,
                "Deletion failed, resource stays marked"
            ),
            status => tracing::debug!(
                resource_id = %outcome.resource_id,
                account_id,
                outcome = ?status,
                "Resource expired"
            ),
        }

        if let Err(err) = self.store.append_outcome(outcome.clone()) {
            tracing::warn!(resource_id = %outcome.resource_id, error = %err, "Could not record deletion outcome");
        }
        outcome
    }

    async fn call_provider(
        &self,
        external_id: &ExternalId,
    ) -> Result<ProviderDeletion, ProviderError> {
        if !self.breaker.allow_request() {
            return Err(ProviderError::CircuitOpen);
        }

        let timeout = self.config.delete_timeout;
        let result =
            match tokio::time::timeout(timeout, self.provider.delete_resource(external_id)).await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };

        match result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    /// Commit `Expired`; a failed commit turns a success into a failure.
    fn expire(&self, resource: &Resource, success: OutcomeStatus) -> OutcomeStatus {
        match self.store.expire_resource(&resource.id, self.clock.now()) {
            Ok(_) => success,
            Err(err) => OutcomeStatus::Failed {
                error: format!("expire commit failed: {err}"),
            },
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}
