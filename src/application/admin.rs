//! Administrative surface.
//!
//! [`AdminService`] is what an operator-facing API sits on top of: account
//! monitoring, limit updates with immediate reconciliation, usage resets,
//! manual sweeps and per-account usage reports.

use crate::application::aggregator::UsageAggregator;
use crate::application::error::EngineError;
use crate::application::mutator::{
    LimitChange, LimitMutator, LimitOutcome, ResetOutcome, ValidationError,
};
use crate::application::ports::{Clock, QuotaStore};
use crate::application::reconciler::DeletionReconciler;
use crate::application::scheduler::EnforcementScheduler;
use crate::domain::account::{Account, AccountId, Actor, PlanLimits};
use crate::domain::resource::ResourceId;
use crate::domain::run::{DeletionOutcome, EnforcementRun};
use crate::domain::status::AccountStatus;
use crate::domain::usage::{UsageEvent, UsageReport, UsageSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Page size used when a query does not ask for one.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Largest page a query may ask for.
pub const MAX_PER_PAGE: u32 = 100;

/// Number of runs [`AdminService::enforcement_status`] returns by default.
pub const DEFAULT_RECENT_RUNS: usize = 10;

/// Filter and page selection for [`AdminService::list_accounts`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccountQuery {
    pub status: Option<AccountStatus>,
    pub account_id: Option<AccountId>,
    /// 1-based
    pub page: u32,
    pub per_page: u32,
}

impl Default for AccountQuery {
    fn default() -> Self {
        Self {
            status: None,
            account_id: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl AccountQuery {
    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_account(mut self, account_id: impl Into<AccountId>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.page == 0 || self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(ValidationError::InvalidPage {
                page: self.page,
                per_page: self.per_page,
                max_per_page: MAX_PER_PAGE,
            });
        }
        Ok(())
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
    pub total_pages: usize,
}

/// Monitoring view of one account.
///
/// The status is derived from fresh usage, never taken from the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountMonitoringRow {
    pub account_id: AccountId,
    pub status: AccountStatus,
    pub limits: PlanLimits,
    pub usage: UsageReport,
    pub marked_resources: usize,
    pub expired_resources: usize,
    pub suspended: bool,
    pub suspension_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_change_by: Option<Actor>,
    pub last_change_at: Option<DateTime<Utc>>,
}

/// Result of [`AdminService::update_limits`].
#[derive(Debug, Clone, PartialEq)]
pub struct LimitUpdateReport {
    pub change: LimitOutcome,
    /// Reconciliation outcomes for the resources the change marked
    pub deletions: Vec<DeletionOutcome>,
}

/// Snapshot returned by [`AdminService::enforcement_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementStatus {
    /// Newest first
    pub recent_runs: Vec<EnforcementRun>,
    /// Suspended, over the minute limit or at the resource limit
    pub accounts_needing_enforcement: Vec<AccountMonitoringRow>,
}

/// What an account is asking to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionKind {
    CreateResource,
    StartCall,
}

/// Answer to an admission check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    /// Human-readable explanation or warning, if there is anything to say
    pub message: Option<String>,
    pub report: UsageReport,
}

impl AdmissionDecision {
    /// Decide from a usage report.
    pub fn evaluate(kind: AdmissionKind, report: UsageReport) -> Self {
        let suspended = report.status == AccountStatus::Suspended;
        let (allowed, message) = match kind {
            AdmissionKind::CreateResource => {
                let remaining = report
                    .resources
                    .limit
                    .saturating_sub(report.resources.count);
                let message = if suspended {
                    Some("Account suspended, contact support to create resources".to_string())
                } else if !report.resources.can_create_resource {
                    Some(format!(
                        "Resource limit reached ({}/{})",
                        report.resources.count, report.resources.limit
                    ))
                } else if remaining == 1 {
                    Some("Only 1 resource slot remaining".to_string())
                } else {
                    None
                };
                (report.resources.can_create_resource, message)
            }
            AdmissionKind::StartCall => {
                let message = if suspended {
                    Some("Account suspended, contact support to make calls".to_string())
                } else if !report.minutes.can_make_call {
                    Some(format!(
                        "Usage limit reached ({:.2}/{} minutes)",
                        report.minutes.used, report.minutes.limit
                    ))
                } else if report.status == AccountStatus::Warning {
                    Some(format!(
                        "Warning: {:.1} minutes remaining",
                        report.minutes.remaining
                    ))
                } else {
                    None
                };
                (report.minutes.can_make_call, message)
            }
        };

        Self {
            allowed,
            message,
            report,
        }
    }
}

/// Operator-facing operations over the engine.
pub struct AdminService<S>
where
    S: QuotaStore,
{
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    aggregator: UsageAggregator<S>,
    mutator: Arc<LimitMutator<S>>,
    reconciler: Arc<DeletionReconciler<S>>,
    scheduler: Arc<EnforcementScheduler<S>>,
    recent_runs: usize,
}

impl<S> AdminService<S>
where
    S: QuotaStore,
{
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        mutator: Arc<LimitMutator<S>>,
        reconciler: Arc<DeletionReconciler<S>>,
        scheduler: Arc<EnforcementScheduler<S>>,
        recent_runs: usize,
    ) -> Self {
        let aggregator = UsageAggregator::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            clock,
            aggregator,
            mutator,
            reconciler,
            scheduler,
            recent_runs,
        }
    }

    /// Accounts, newest first, filtered and paged.
    pub fn list_accounts(
        &self,
        query: &AccountQuery,
    ) -> Result<Page<AccountMonitoringRow>, EngineError> {
        query.validate()?;

        let mut accounts = self.store.accounts()?;
        if let Some(id) = &query.account_id {
            accounts.retain(|a| &a.id == id);
        }
        accounts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut rows = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let row = self.monitoring_row(account)?;
            if query.status.map_or(true, |status| row.status == status) {
                rows.push(row);
            }
        }

        let per_page = query.per_page as usize;
        let total = rows.len();
        let items = rows
            .into_iter()
            .skip((query.page as usize - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();

        Ok(Page {
            items,
            page: query.page,
            per_page: query.per_page,
            total,
            total_pages: total.div_ceil(per_page),
        })
    }

    fn monitoring_row(&self, account: &Account) -> Result<AccountMonitoringRow, EngineError> {
        let resources = self.store.resources_for(&account.id)?;
        let usage = self.aggregator.snapshot_for(account, &resources)?;
        let status = account.status(&usage);

        Ok(AccountMonitoringRow {
            account_id: account.id.clone(),
            status,
            limits: account.limits,
            usage: UsageReport::build(&account.limits, &usage, status),
            marked_resources: resources.iter().filter(|r| r.is_marked()).count(),
            expired_resources: resources.iter().filter(|r| r.is_expired()).count(),
            suspended: account.is_suspended(),
            suspension_reason: account.suspension.as_ref().map(|s| s.reason.clone()),
            created_at: account.created_at,
            last_change_by: account.last_change_by.clone(),
            last_change_at: account.last_change_at,
        })
    }

    /// Apply a limit change and immediately reconcile what it marked.
    pub async fn update_limits(
        &self,
        account_id: &AccountId,
        change: &LimitChange,
    ) -> Result<LimitUpdateReport, EngineError> {
        let change = self.mutator.apply_limits(account_id, change).await?;
        let deletions = self.reconciler.reconcile(&change.resources_marked).await;
        Ok(LimitUpdateReport { change, deletions })
    }

    /// Start a fresh usage window for the account.
    pub async fn reset_usage(
        &self,
        account_id: &AccountId,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<ResetOutcome, EngineError> {
        self.mutator.reset_usage(account_id, actor, reason).await
    }

    /// Run a sweep now on behalf of `actor`.
    pub async fn trigger_sweep(&self, actor: &Actor) -> Result<EnforcementRun, EngineError> {
        self.scheduler.run_sweep(actor).await
    }

    /// Recent sweeps and the accounts that currently need enforcement.
    pub fn enforcement_status(&self) -> Result<EnforcementStatus, EngineError> {
        let recent_runs = self.store.recent_runs(self.recent_runs)?;
        let mut accounts_needing_enforcement = Vec::new();
        for account in self.store.accounts()? {
            let row = self.monitoring_row(&account)?;
            if row.status.needs_enforcement() {
                accounts_needing_enforcement.push(row);
            }
        }
        Ok(EnforcementStatus {
            recent_runs,
            accounts_needing_enforcement,
        })
    }

    /// Quota position of one account.
    pub fn usage_report(&self, account_id: &AccountId) -> Result<UsageReport, EngineError> {
        let account = self.store.account(account_id)?;
        let usage: UsageSnapshot = self.aggregator.compute_usage(account_id)?;
        Ok(UsageReport::build(
            &account.limits,
            &usage,
            account.status(&usage),
        ))
    }

    /// Whether the account may create a resource or start a call right now.
    pub fn check_admission(
        &self,
        account_id: &AccountId,
        kind: AdmissionKind,
    ) -> Result<AdmissionDecision, EngineError> {
        let report = self.usage_report(account_id)?;
        Ok(AdmissionDecision::evaluate(kind, report))
    }

    /// Append usage for a resource owned by the account.
    pub fn record_usage(
        &self,
        account_id: &AccountId,
        resource_id: &ResourceId,
        duration_seconds: u64,
    ) -> Result<UsageEvent, EngineError> {
        if duration_seconds == 0 {
            return Err(ValidationError::ZeroDuration.into());
        }
        self.store.account(account_id)?;
        let resource = self.store.resource(resource_id)?;
        if &resource.account_id != account_id {
            return Err(EngineError::ResourceNotOwned {
                resource_id: resource_id.clone(),
                account_id: account_id.clone(),
            });
        }

        let event = UsageEvent::new(
            account_id.clone(),
            Some(resource_id.clone()),
            duration_seconds,
            self.clock.now(),
        );
        self.store.append_usage(event.clone())?;
        tracing::debug!(
            account_id = %account_id,
            resource_id = %resource_id,
            seconds = duration_seconds,
            "Recorded usage"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::usage::{MinutesReport, ResourcesReport};

    fn report(status: AccountStatus, minutes: (f64, u32), resources: (u32, u32)) -> UsageReport {
        let suspended = status == AccountStatus::Suspended;
        UsageReport {
            minutes: MinutesReport {
                used: minutes.0,
                limit: minutes.1,
                percentage: 0,
                remaining: (f64::from(minutes.1) - minutes.0).max(0.0),
                can_make_call: !suspended && minutes.0 < f64::from(minutes.1),
            },
            resources: ResourcesReport {
                count: resources.0,
                limit: resources.1,
                can_create_resource: !suspended && resources.0 < resources.1,
            },
            status,
        }
    }

    #[test]
    fn test_query_validation() {
        assert!(AccountQuery::default().validate().is_ok());
        assert!(AccountQuery::default().page(0, 20).validate().is_err());
        assert!(AccountQuery::default().page(1, 0).validate().is_err());
        assert!(AccountQuery::default()
            .page(1, MAX_PER_PAGE + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_query_from_json() {
        let query: AccountQuery =
            serde_json::from_str(r#"{"status": "OVER_LIMIT", "page": 2}"#).unwrap();
        assert_eq!(query.status, Some(AccountStatus::OverLimit));
        assert_eq!(query.page, 2);
        assert_eq!(query.per_page, DEFAULT_PER_PAGE);
    }

    #[test]
    fn test_admission_resource_limit() {
        let decision = AdmissionDecision::evaluate(
            AdmissionKind::CreateResource,
            report(AccountStatus::AtResourceLimit, (1.0, 10), (3, 3)),
        );
        assert!(!decision.allowed);
        assert_eq!(decision.message.as_deref(), Some("Resource limit reached (3/3)"));

        let decision = AdmissionDecision::evaluate(
            AdmissionKind::CreateResource,
            report(AccountStatus::Normal, (1.0, 10), (1, 2)),
        );
        assert!(decision.allowed);
        assert_eq!(
            decision.message.as_deref(),
            Some("Only 1 resource slot remaining")
        );
    }

    #[test]
    fn test_admission_calls() {
        let decision = AdmissionDecision::evaluate(
            AdmissionKind::StartCall,
            report(AccountStatus::Warning, (8.5, 10), (0, 3)),
        );
        assert!(decision.allowed);
        assert_eq!(
            decision.message.as_deref(),
            Some("Warning: 1.5 minutes remaining")
        );

        let decision = AdmissionDecision::evaluate(
            AdmissionKind::StartCall,
            report(AccountStatus::OverLimit, (10.0, 10), (0, 3)),
        );
        assert!(!decision.allowed);
        assert_eq!(
            decision.message.as_deref(),
            Some("Usage limit reached (10.00/10 minutes)")
        );
    }

    #[test]
    fn test_suspended_blocks_everything() {
        for kind in [AdmissionKind::CreateResource, AdmissionKind::StartCall] {
            let decision = AdmissionDecision::evaluate(
                kind,
                report(AccountStatus::Suspended, (0.0, 10), (0, 3)),
            );
            assert!(!decision.allowed);
            assert!(decision.message.unwrap().starts_with("Account suspended"));
        }
    }
}
