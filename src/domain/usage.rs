//! Usage facts and their presentation.
//!
//! Usage is recorded as append-only [`UsageEvent`]s with second granularity
//! and summed into a [`UsageSnapshot`]. Minutes are only derived (and only
//! rounded) when presenting a [`UsageReport`].

use crate::domain::account::{AccountId, PlanLimits};
use crate::domain::resource::ResourceId;
use crate::domain::status::AccountStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed unit of metered usage (e.g. a call).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub account_id: AccountId,
    /// The resource that consumed the usage, if known
    pub resource_id: Option<ResourceId>,
    pub duration_seconds: u64,
    pub occurred_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(
        account_id: AccountId,
        resource_id: Option<ResourceId>,
        duration_seconds: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            resource_id,
            duration_seconds,
            occurred_at,
        }
    }
}

/// Aggregated usage for one account at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Total metered seconds inside the current usage window
    pub usage_seconds: u64,
    /// Resources currently in the `Active` state
    pub active_resource_count: u32,
}

impl UsageSnapshot {
    pub fn new(usage_seconds: u64, active_resource_count: u32) -> Self {
        Self {
            usage_seconds,
            active_resource_count,
        }
    }

    /// Convenience constructor for whole minutes.
    pub fn from_minutes(minutes: u64, active_resource_count: u32) -> Self {
        Self::new(minutes.saturating_mul(60), active_resource_count)
    }

    /// Usage in fractional minutes, unrounded.
    pub fn usage_minutes(&self) -> f64 {
        self.usage_seconds as f64 / 60.0
    }
}

/// Sum the durations of events that fall inside `[from, until]`.
///
/// `from` of `None` means "since the beginning". Events stamped after
/// `until` are ignored so a skewed producer cannot charge future usage.
pub fn sum_window<'a, I>(events: I, from: Option<DateTime<Utc>>, until: DateTime<Utc>) -> u64
where
    I: IntoIterator<Item = &'a UsageEvent>,
{
    events
        .into_iter()
        .filter(|event| from.map_or(true, |from| event.occurred_at >= from))
        .filter(|event| event.occurred_at <= until)
        .fold(0u64, |total, event| {
            total.saturating_add(event.duration_seconds)
        })
}

/// Minute quota as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinutesReport {
    pub used: f64,
    pub limit: u32,
    pub percentage: u32,
    pub remaining: f64,
    pub can_make_call: bool,
}

/// Resource quota as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourcesReport {
    pub count: u32,
    pub limit: u32,
    pub can_create_resource: bool,
}

/// Presentation of an account's quota position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub minutes: MinutesReport,
    pub resources: ResourcesReport,
    pub status: AccountStatus,
}

impl UsageReport {
    /// Build a report. This is the only place usage minutes get rounded.
    pub fn build(limits: &PlanLimits, usage: &UsageSnapshot, status: AccountStatus) -> Self {
        let used = usage.usage_minutes();
        let limit = f64::from(limits.max_usage_minutes);
        let percentage = if limits.max_usage_minutes > 0 {
            (used / limit * 100.0).round() as u32
        } else {
            0
        };
        let suspended = status == AccountStatus::Suspended;

        Self {
            minutes: MinutesReport {
                used: round_hundredths(used),
                limit: limits.max_usage_minutes,
                percentage,
                remaining: round_hundredths((limit - used).max(0.0)),
                can_make_call: !suspended && usage.usage_seconds < limits.max_usage_seconds(),
            },
            resources: ResourcesReport {
                count: usage.active_resource_count,
                limit: limits.max_resources,
                can_create_resource: !suspended
                    && usage.active_resource_count < limits.max_resources,
            },
            status,
        }
    }
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
