//! Audit records: enforcement runs, deletion outcomes and limit changes.
//!
//! Records in this module are append-only. Nothing mutates them once they
//! have been handed to the audit log.

use crate::domain::account::{AccountId, Actor, PlanLimits};
use crate::domain::resource::{DeletionReason, ExternalId, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one enforcement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of trying to remove one resource from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The provider deleted it
    Deleted,
    /// The provider did not have it (already converged)
    AlreadyAbsent,
    /// No external id was ever assigned; expired locally
    NoExternalResource,
    /// Left marked for the next sweep
    Failed { error: String },
}

impl OutcomeStatus {
    /// Whether the resource reached `Expired`.
    pub fn is_success(&self) -> bool {
        !matches!(self, OutcomeStatus::Failed { .. })
    }
}

/// Per-resource outcome recorded by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub resource_id: ResourceId,
    /// `None` when the resource could not be read
    pub account_id: Option<AccountId>,
    pub external_id: Option<ExternalId>,
    pub reason: Option<DeletionReason>,
    pub status: OutcomeStatus,
    pub recorded_at: DateTime<Utc>,
}

impl DeletionOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// An account whose processing failed during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFailure {
    pub account_id: AccountId,
    pub error: String,
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Resources newly marked during this run
    pub marked: usize,
    /// Resources that reached `Expired`
    pub deleted: usize,
    /// Resources left marked after a failed attempt
    pub failed: usize,
    /// Previously marked resources picked up for another attempt
    pub retried: usize,
    pub accounts_examined: usize,
    /// Accounts already claimed by a concurrent sweep
    pub accounts_skipped: usize,
}

impl RunCounts {
    /// Tally reconciliation outcomes into `deleted` / `failed`.
    pub fn record_outcomes(&mut self, outcomes: &[DeletionOutcome]) {
        for outcome in outcomes {
            if outcome.is_success() {
                self.deleted += 1;
            } else {
                self.failed += 1;
            }
        }
    }
}

/// Audit record of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementRun {
    pub id: RunId,
    pub initiator: Actor,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub outcomes: Vec<DeletionOutcome>,
    pub account_failures: Vec<AccountFailure>,
    /// The sweep stopped early at an account boundary
    pub cancelled: bool,
}

impl EnforcementRun {
    /// Outcomes that left a resource marked.
    pub fn failed_outcomes(&self) -> impl Iterator<Item = &DeletionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// What kind of administrative change was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    LimitUpdate,
    UsageReset,
}

/// Audit record of an administrative change to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitChangeRecord {
    pub account_id: AccountId,
    pub kind: ChangeKind,
    pub actor: Actor,
    pub reason: String,
    pub previous_limits: PlanLimits,
    pub new_limits: PlanLimits,
    pub suspended: bool,
    /// Resources marked (limit update) or reactivated (usage reset)
    pub resources: Vec<ResourceId>,
    pub changed_at: DateTime<Utc>,
}
