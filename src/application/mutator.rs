//! Limit mutation.
//!
//! Every change to an account's limits, suspension or usage watermark goes
//! through [`LimitMutator`]. Changes to one account are serialized by a
//! per-account async lock and persisted as a single [`AccountCommit`], so a
//! failure leaves neither the new limits nor any of the marks behind.

use crate::application::aggregator::UsageAggregator;
use crate::application::error::EngineError;
use crate::application::locks::LockTable;
use crate::application::metrics::Metrics;
use crate::application::ports::{AccountCommit, Clock, QuotaStore, ResourceMark};
use crate::domain::account::{Account, AccountId, Actor, PlanLimits, Suspension};
use crate::domain::resource::{DeletionReason, Resource, ResourceId};
use crate::domain::run::{ChangeKind, LimitChangeRecord};
use crate::domain::selection::{plan_enforcement, plan_limit_change, MarkPlan};
use crate::domain::status::AccountStatus;
use crate::domain::usage::UsageSnapshot;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Reason recorded when a limit change does not carry one.
pub const DEFAULT_CHANGE_REASON: &str = "Admin adjustment";

/// Reason recorded when a usage reset does not carry one.
pub const DEFAULT_RESET_REASON: &str = "Admin reset";

/// A request rejected before anything was changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be between 0 and {max}, got {value}")]
    LimitOutOfRange {
        field: &'static str,
        value: i64,
        max: u32,
    },
    #[error("an actor is required")]
    MissingActor,
    #[error("usage duration must be greater than zero")]
    ZeroDuration,
    #[error("page must be at least 1 and per_page between 1 and {max_per_page}, got page {page} per_page {per_page}")]
    InvalidPage {
        page: u32,
        per_page: u32,
        max_per_page: u32,
    },
}

/// An administrative change to an account's limits.
///
/// Fields left as `None` keep their current value. Limits are taken as
/// signed integers so that negative input is reported instead of wrapping.
///
/// ```
/// use quota_reconcile::LimitChange;
///
/// let change = LimitChange::by("admin@example.com")
///     .max_resources(1)
///     .reason("downgrade to starter plan");
/// assert_eq!(change.max_resources, Some(1));
/// assert_eq!(change.max_usage_minutes, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimitChange {
    pub actor: Actor,
    #[serde(default)]
    pub max_resources: Option<i64>,
    #[serde(default)]
    pub max_usage_minutes: Option<i64>,
    #[serde(default)]
    pub suspend: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl LimitChange {
    /// Start a change made by `actor`.
    pub fn by(actor: impl Into<Actor>) -> Self {
        Self {
            actor: actor.into(),
            max_resources: None,
            max_usage_minutes: None,
            suspend: None,
            reason: None,
        }
    }

    pub fn max_resources(mut self, value: i64) -> Self {
        self.max_resources = Some(value);
        self
    }

    pub fn max_usage_minutes(mut self, value: i64) -> Self {
        self.max_usage_minutes = Some(value);
        self
    }

    /// Suspend (`true`) or lift a suspension (`false`).
    pub fn suspend(mut self, suspend: bool) -> Self {
        self.suspend = Some(suspend);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// The recorded reason, falling back to [`DEFAULT_CHANGE_REASON`].
    pub fn reason_or_default(&self) -> &str {
        match self.reason.as_deref() {
            Some(reason) if !reason.trim().is_empty() => reason,
            _ => DEFAULT_CHANGE_REASON,
        }
    }

    /// Check every field and produce the limits that would result from
    /// applying this change on top of `current`.
    pub fn resolve(&self, current: &PlanLimits) -> Result<PlanLimits, ValidationError> {
        if self.actor.as_str().trim().is_empty() {
            return Err(ValidationError::MissingActor);
        }
        let max_resources = match self.max_resources {
            Some(value) => limit_value("max_resources", value)?,
            None => current.max_resources,
        };
        let max_usage_minutes = match self.max_usage_minutes {
            Some(value) => limit_value("max_usage_minutes", value)?,
            None => current.max_usage_minutes,
        };
        Ok(PlanLimits::new(max_resources, max_usage_minutes))
    }
}

fn limit_value(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| ValidationError::LimitOutOfRange {
        field,
        value,
        max: u32::MAX,
    })
}

/// Result of [`LimitMutator::apply_limits`].
#[derive(Debug, Clone, PartialEq)]
pub struct LimitOutcome {
    pub account_id: AccountId,
    pub limits: PlanLimits,
    pub suspended: bool,
    /// Exactly the resources this change marked, newest first
    pub resources_marked: Vec<ResourceId>,
    pub reason: Option<DeletionReason>,
    /// Status after the change and its marks
    pub status: AccountStatus,
}

/// Result of [`LimitMutator::enforce`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnforceOutcome {
    pub account_id: AccountId,
    pub usage: UsageSnapshot,
    /// Status the account was classified with before marking
    pub status: AccountStatus,
    pub marked: Option<MarkPlan>,
}

impl EnforceOutcome {
    pub fn marked_ids(&self) -> &[ResourceId] {
        self.marked
            .as_ref()
            .map(|plan| plan.resources.as_slice())
            .unwrap_or(&[])
    }
}

/// Result of [`LimitMutator::reset_usage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResetOutcome {
    pub account_id: AccountId,
    pub usage_reset_at: DateTime<Utc>,
    /// Marked resources moved back to `Active`, oldest first
    pub reactivated: Vec<ResourceId>,
    /// Marked resources left alone because a deletion was in flight
    pub skipped_in_flight: Vec<ResourceId>,
    pub status: AccountStatus,
}

/// Applies limit changes, sweep-time enforcement and usage resets.
pub struct LimitMutator<S>
where
    S: QuotaStore,
{
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    aggregator: UsageAggregator<S>,
    account_locks: LockTable<AccountId>,
    resource_locks: LockTable<ResourceId>,
    metrics: Metrics,
}

impl<S> LimitMutator<S>
where
    S: QuotaStore,
{
    /// `resource_locks` must be the table the reconciler uses, so a reset
    /// never reactivates a resource whose deletion is in flight.
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        resource_locks: LockTable<ResourceId>,
        metrics: Metrics,
    ) -> Self {
        let aggregator = UsageAggregator::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            clock,
            aggregator,
            account_locks: LockTable::new(),
            resource_locks,
            metrics,
        }
    }

    /// Apply an administrative limit change.
    ///
    /// Suspension marks every active resource `UserSuspended`. Otherwise,
    /// when more resources are active than the new maximum allows, the
    /// newest ones are marked `AdminLimitReduction`.
    #[tracing::instrument(skip_all, fields(account_id = %account_id, actor = %change.actor))]
    pub async fn apply_limits(
        &self,
        account_id: &AccountId,
        change: &LimitChange,
    ) -> Result<LimitOutcome, EngineError> {
        let _guard = self.account_locks.lock(account_id.clone()).await;

        let account = self.store.account(account_id)?;
        let limits = change.resolve(&account.limits)?;
        let resources = self.store.resources_for(account_id)?;
        let usage = self.aggregator.snapshot_for(&account, &resources)?;
        let now = self.clock.now();

        let suspend = change.suspend.unwrap_or_else(|| account.is_suspended());
        let plan = plan_limit_change(suspend, limits.max_resources, &resources);
        let reason = change.reason_or_default().to_string();

        let mut updated = account.clone();
        updated.limits = limits;
        updated.suspension = match (suspend, account.suspension.clone()) {
            (false, _) => None,
            (true, Some(existing)) => Some(existing),
            (true, None) => Some(Suspension {
                reason: reason.clone(),
                since: now,
            }),
        };
        updated.last_change_by = Some(change.actor.clone());
        updated.last_change_at = Some(now);
        refresh_cache(&mut updated, usage, plan.as_ref());

        let marked = plan
            .as_ref()
            .map(|p| p.resources.clone())
            .unwrap_or_default();
        let audit = LimitChangeRecord {
            account_id: account_id.clone(),
            kind: ChangeKind::LimitUpdate,
            actor: change.actor.clone(),
            reason,
            previous_limits: account.limits,
            new_limits: limits,
            suspended: suspend,
            resources: marked.clone(),
            changed_at: now,
        };

        let mut commit = AccountCommit::new(updated, account.revision);
        commit.marks = marks_for(plan.as_ref(), &change.actor, now);
        commit.audit = Some(audit);
        let stored = self.store.commit(commit)?;

        self.metrics.record_marked(marked.len());
        tracing::info!(
            max_resources = limits.max_resources,
            max_usage_minutes = limits.max_usage_minutes,
            suspended = suspend,
            marked = marked.len(),
            "Applied limit change"
        );

        Ok(LimitOutcome {
            account_id: account_id.clone(),
            limits,
            suspended: suspend,
            resources_marked: marked,
            reason: plan.map(|p| p.reason),
            status: stored.cached_status,
        })
    }

    /// Classify an account against its current limits and mark whatever the
    /// classification calls for. Also refreshes the cached status.
    pub async fn enforce(
        &self,
        account_id: &AccountId,
        actor: &Actor,
    ) -> Result<EnforceOutcome, EngineError> {
        let _guard = self.account_locks.lock(account_id.clone()).await;

        let account = self.store.account(account_id)?;
        let resources = self.store.resources_for(account_id)?;
        let usage = self.aggregator.snapshot_for(&account, &resources)?;
        let status = account.status(&usage);
        let plan = plan_enforcement(status, &account.limits, &resources);

        let mut updated = account.clone();
        refresh_cache(&mut updated, usage, plan.as_ref());

        if plan.is_some()
            || updated.cached_usage != account.cached_usage
            || updated.cached_status != account.cached_status
        {
            let mut commit = AccountCommit::new(updated, account.revision);
            commit.marks = marks_for(plan.as_ref(), actor, self.clock.now());
            self.store.commit(commit)?;
        }

        if let Some(plan) = &plan {
            self.metrics.record_marked(plan.len());
            tracing::info!(
                account_id = %account_id,
                status = %status,
                reason = %plan.reason,
                marked = plan.len(),
                "Marked resources for deletion"
            );
        } else {
            tracing::debug!(account_id = %account_id, status = %status, "Nothing to enforce");
        }

        Ok(EnforceOutcome {
            account_id: account_id.clone(),
            usage,
            status,
            marked: plan,
        })
    }

    /// Start a new usage window at the current instant.
    ///
    /// Marked resources are reactivated oldest first while the plan has room
    /// for them. Resources whose deletion is in flight and resources of a
    /// suspended account stay marked.
    #[tracing::instrument(skip_all, fields(account_id = %account_id, actor = %actor))]
    pub async fn reset_usage(
        &self,
        account_id: &AccountId,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<ResetOutcome, EngineError> {
        if actor.as_str().trim().is_empty() {
            return Err(ValidationError::MissingActor.into());
        }
        let _guard = self.account_locks.lock(account_id.clone()).await;

        let account = self.store.account(account_id)?;
        let resources = self.store.resources_for(account_id)?;
        let now = self.clock.now();

        let active = resources.iter().filter(|r| r.is_active()).count();
        let capacity = usize::try_from(account.limits.max_resources)
            .unwrap_or(usize::MAX)
            .saturating_sub(active);

        let mut reactivated = Vec::new();
        let mut skipped_in_flight = Vec::new();
        // Held until the commit lands so the reconciler cannot pick them up.
        let mut held = Vec::new();
        if !account.is_suspended() {
            for resource in oldest_marked(&resources) {
                if reactivated.len() >= capacity {
                    break;
                }
                match self.resource_locks.try_lock(resource.id.clone()) {
                    Some(guard) => {
                        held.push(guard);
                        reactivated.push(resource.id.clone());
                    }
                    None => skipped_in_flight.push(resource.id.clone()),
                }
            }
        }

        let usage = UsageSnapshot::new(
            0,
            u32::try_from(active + reactivated.len()).unwrap_or(u32::MAX),
        );
        let reason = match reason {
            Some(reason) if !reason.trim().is_empty() => reason.to_string(),
            _ => DEFAULT_RESET_REASON.to_string(),
        };

        let mut updated = account.clone();
        updated.usage_reset_at = Some(now);
        updated.last_change_by = Some(actor.clone());
        updated.last_change_at = Some(now);
        updated.cached_usage = usage;
        updated.cached_status = updated.status(&usage);

        let mut commit = AccountCommit::new(updated, account.revision);
        commit.reactivations = reactivated.clone();
        commit.audit = Some(LimitChangeRecord {
            account_id: account_id.clone(),
            kind: ChangeKind::UsageReset,
            actor: actor.clone(),
            reason,
            previous_limits: account.limits,
            new_limits: account.limits,
            suspended: account.is_suspended(),
            resources: reactivated.clone(),
            changed_at: now,
        });
        let stored = self.store.commit(commit)?;
        drop(held);

        tracing::info!(
            reactivated = reactivated.len(),
            skipped_in_flight = skipped_in_flight.len(),
            "Reset usage"
        );

        Ok(ResetOutcome {
            account_id: account_id.clone(),
            usage_reset_at: now,
            reactivated,
            skipped_in_flight,
            status: stored.cached_status,
        })
    }

    pub(crate) fn aggregator(&self) -> &UsageAggregator<S> {
        &self.aggregator
    }
}

fn marks_for(plan: Option<&MarkPlan>, actor: &Actor, at: DateTime<Utc>) -> Vec<ResourceMark> {
    plan.map(|plan| {
        plan.resources
            .iter()
            .map(|id| ResourceMark {
                resource_id: id.clone(),
                reason: plan.reason,
                actor: actor.clone(),
                at,
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Update the cached usage and status to reflect the account after `plan`.
fn refresh_cache(account: &mut Account, usage: UsageSnapshot, plan: Option<&MarkPlan>) {
    let marked = plan
        .map(|p| u32::try_from(p.len()).unwrap_or(u32::MAX))
        .unwrap_or(0);
    let after = UsageSnapshot::new(
        usage.usage_seconds,
        usage.active_resource_count.saturating_sub(marked),
    );
    account.cached_usage = after;
    account.cached_status = account.status(&after);
}

fn oldest_marked(resources: &[Resource]) -> Vec<&Resource> {
    let mut marked: Vec<&Resource> = resources.iter().filter(|r| r.is_marked()).collect();
    marked.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    marked
}
