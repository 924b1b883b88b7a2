//! Accounts, plan limits and the actors who change them.

use crate::domain::status::{classify, AccountStatus};
use crate::domain::usage::UsageSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of resources a new plan allows.
pub const DEFAULT_MAX_RESOURCES: u32 = 3;

/// Default number of usage minutes a new plan allows.
pub const DEFAULT_MAX_USAGE_MINUTES: u32 = 10;

/// Identifier of a tenant account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The authenticated identity behind a change (an admin email, `system@automated`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    /// Actor used for scheduled sweeps when no operator is involved.
    pub const SYSTEM: &'static str = "system@automated";

    pub fn new(actor: impl Into<String>) -> Self {
        Self(actor.into())
    }

    /// The automated system actor.
    pub fn system() -> Self {
        Self::new(Self::SYSTEM)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Actor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Quota limits attached to an account's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Maximum number of concurrently active resources
    pub max_resources: u32,
    /// Maximum total usage in minutes
    pub max_usage_minutes: u32,
}

impl PlanLimits {
    pub fn new(max_resources: u32, max_usage_minutes: u32) -> Self {
        Self {
            max_resources,
            max_usage_minutes,
        }
    }

    /// The minute limit expressed in seconds, the unit usage is aggregated in.
    pub fn max_usage_seconds(&self) -> u64 {
        u64::from(self.max_usage_minutes) * 60
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESOURCES, DEFAULT_MAX_USAGE_MINUTES)
    }
}

/// Why and since when an account is suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspension {
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// A tenant subject to quotas.
///
/// `cached_status` and `cached_usage` are written by sweeps for cheap reads;
/// neither is authoritative. [`Account::status`] always recomputes from the
/// limits and a fresh usage snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub limits: PlanLimits,
    pub suspension: Option<Suspension>,
    /// Usage events before this instant no longer count against the limits
    pub usage_reset_at: Option<DateTime<Utc>>,
    pub cached_usage: UsageSnapshot,
    pub cached_status: AccountStatus,
    pub last_change_by: Option<Actor>,
    pub last_change_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every committed change; used to detect concurrent writers
    pub revision: u64,
}

impl Account {
    /// Create an account on the default plan.
    pub fn new(id: impl Into<AccountId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            limits: PlanLimits::default(),
            suspension: None,
            usage_reset_at: None,
            cached_usage: UsageSnapshot::default(),
            cached_status: AccountStatus::Normal,
            last_change_by: None,
            last_change_at: None,
            created_at,
            revision: 0,
        }
    }

    /// Replace the plan limits.
    pub fn with_limits(mut self, limits: PlanLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Mark the account suspended.
    pub fn suspended(mut self, reason: impl Into<String>, since: DateTime<Utc>) -> Self {
        self.suspension = Some(Suspension {
            reason: reason.into(),
            since,
        });
        self
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }

    /// Derive the status for the given usage.
    pub fn status(&self, usage: &UsageSnapshot) -> AccountStatus {
        classify(&self.limits, usage, self.is_suspended())
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan() {
        let account = Account::new("acct", Utc::now());
        assert_eq!(account.limits.max_resources, 3);
        assert_eq!(account.limits.max_usage_minutes, 10);
        assert_eq!(account.limits.max_usage_seconds(), 600);
        assert!(!account.is_suspended());
    }

    #[test]
    fn test_status_is_derived_not_cached() {
        let mut account = Account::new("acct", Utc::now()).with_limits(PlanLimits::new(2, 10));
        account.cached_status = AccountStatus::Suspended;

        let usage = UsageSnapshot::new(0, 0);
        assert_eq!(account.status(&usage), AccountStatus::Normal);
    }

    #[test]
    fn test_suspension_wins() {
        let account = Account::new("acct", Utc::now()).suspended("abuse", Utc::now());
        assert_eq!(
            account.status(&UsageSnapshot::new(0, 0)),
            AccountStatus::Suspended
        );
    }

    #[test]
    fn test_actor_system() {
        assert_eq!(Actor::system().as_str(), "system@automated");
    }
}
