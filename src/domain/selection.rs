//! Selection of resources to revoke.
//!
//! Resources are ranked by `(created_at, id)` ascending. The oldest ones keep
//! running; the excess is taken from the newest end, so a user's
//! longest-standing configurations survive a limit reduction.

use crate::domain::account::PlanLimits;
use crate::domain::resource::{DeletionReason, Resource, ResourceId};
use crate::domain::status::AccountStatus;

/// Resources chosen for marking, together with the reason to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkPlan {
    pub reason: DeletionReason,
    /// Newest first
    pub resources: Vec<ResourceId>,
}

impl MarkPlan {
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn ranked(active: &[Resource]) -> Vec<&Resource> {
    let mut ranked: Vec<&Resource> = active.iter().filter(|r| r.is_active()).collect();
    ranked.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

/// Pick the `max(0, active - keep)` newest active resources.
pub fn select_excess(active: &[Resource], keep: u32) -> Vec<ResourceId> {
    let ranked = ranked(active);
    let keep = usize::try_from(keep).unwrap_or(usize::MAX).min(ranked.len());
    ranked[keep..].iter().rev().map(|r| r.id.clone()).collect()
}

/// Every active resource, newest first.
pub fn select_all(active: &[Resource]) -> Vec<ResourceId> {
    select_excess(active, 0)
}

/// Marks implied by an administrative limit change.
///
/// Suspension takes every active resource; otherwise only the count excess
/// over `max_resources` is taken.
pub fn plan_limit_change(
    suspend: bool,
    max_resources: u32,
    active: &[Resource],
) -> Option<MarkPlan> {
    let (reason, resources) = if suspend {
        (DeletionReason::UserSuspended, select_all(active))
    } else {
        (
            DeletionReason::AdminLimitReduction,
            select_excess(active, max_resources),
        )
    };
    non_empty(reason, resources)
}

/// Marks implied by a sweep's classification of the account.
///
/// An account out of minutes cannot use any of its resources, so all of
/// them are treated as equally eligible and every active one is marked.
///
/// Count excess found by a sweep is recorded as
/// [`DeletionReason::AdminLimitReduction`] even when no administrator acted.
/// The reason names the exceeded limit; `marked_by` on each resource holds
/// the sweep's initiator.
pub fn plan_enforcement(
    status: AccountStatus,
    limits: &PlanLimits,
    active: &[Resource],
) -> Option<MarkPlan> {
    match status {
        AccountStatus::Suspended => plan_limit_change(true, limits.max_resources, active),
        AccountStatus::OverLimit => {
            non_empty(DeletionReason::MinutesLimitExceeded, select_all(active))
        }
        _ => plan_limit_change(false, limits.max_resources, active),
    }
}

fn non_empty(reason: DeletionReason, resources: Vec<ResourceId>) -> Option<MarkPlan> {
    if resources.is_empty() {
        None
    } else {
        Some(MarkPlan { reason, resources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountId;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn resource(id: &str, created: DateTime<Utc>) -> Resource {
        Resource::new(id, AccountId::new("acct"), None, created)
    }

    fn ids(ids: &[&str]) -> Vec<ResourceId> {
        ids.iter().map(|id| ResourceId::new(*id)).collect()
    }

    #[test]
    fn test_newest_marked_first() {
        let active = vec![
            resource("r3", t(3)),
            resource("r1", t(1)),
            resource("r2", t(2)),
        ];

        assert_eq!(select_excess(&active, 1), ids(&["r3", "r2"]));
        assert_eq!(select_excess(&active, 2), ids(&["r3"]));
        assert!(select_excess(&active, 3).is_empty());
        assert!(select_excess(&active, 10).is_empty());
    }

    #[test]
    fn test_tie_break_by_id() {
        let active = vec![
            resource("b", t(1)),
            resource("c", t(1)),
            resource("a", t(1)),
        ];

        // "a" ranks first and is kept
        assert_eq!(select_excess(&active, 1), ids(&["c", "b"]));
    }

    #[test]
    fn test_exact_excess_count() {
        let active: Vec<_> = (0..7)
            .map(|i| resource(&format!("r{i}"), t(i)))
            .collect();

        for keep in 0..10u32 {
            let marked = select_excess(&active, keep);
            assert_eq!(marked.len(), 7usize.saturating_sub(keep as usize));
            if keep > 0 && !marked.is_empty() {
                assert!(!marked.contains(&ResourceId::new("r0")));
            }
        }
    }

    #[test]
    fn test_inactive_resources_ignored() {
        let mut marked = resource("old", t(0));
        marked
            .mark_for_deletion(
                DeletionReason::UserSuspended,
                &crate::domain::account::Actor::system(),
                t(5),
            )
            .unwrap();
        let active = vec![marked, resource("new", t(1))];

        assert_eq!(select_all(&active), ids(&["new"]));
    }

    #[test]
    fn test_plan_limit_change() {
        let active = vec![resource("r1", t(1)), resource("r2", t(2))];

        let plan = plan_limit_change(true, 5, &active).unwrap();
        assert_eq!(plan.reason, DeletionReason::UserSuspended);
        assert_eq!(plan.len(), 2);

        let plan = plan_limit_change(false, 1, &active).unwrap();
        assert_eq!(plan.reason, DeletionReason::AdminLimitReduction);
        assert_eq!(plan.resources, ids(&["r2"]));

        assert!(plan_limit_change(false, 2, &active).is_none());
    }

    #[test]
    fn test_plan_enforcement() {
        let limits = PlanLimits::new(1, 10);
        let active = vec![resource("r1", t(1)), resource("r2", t(2))];

        let plan = plan_enforcement(AccountStatus::OverLimit, &limits, &active).unwrap();
        assert_eq!(plan.reason, DeletionReason::MinutesLimitExceeded);
        assert_eq!(plan.resources, ids(&["r2", "r1"]));

        let plan = plan_enforcement(AccountStatus::AtResourceLimit, &limits, &active).unwrap();
        assert_eq!(plan.reason, DeletionReason::AdminLimitReduction);
        assert_eq!(plan.resources, ids(&["r2"]));

        let roomy = PlanLimits::new(5, 10);
        assert!(plan_enforcement(AccountStatus::Warning, &roomy, &active).is_none());
        assert!(plan_enforcement(AccountStatus::OverLimit, &roomy, &[]).is_none());
    }
}
