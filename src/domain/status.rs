//! Account status classification.
//!
//! This is the single place an account's status is derived. Everything else
//! (monitoring rows, sweeps, admission checks) consumes [`classify`] rather
//! than re-deriving thresholds inline.

use crate::domain::account::PlanLimits;
use crate::domain::usage::UsageSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Warning threshold as a fraction of a limit, expressed as `NUM / DEN`.
const WARNING_NUMERATOR: u64 = 8;
const WARNING_DENOMINATOR: u64 = 10;

/// Status of an account with respect to its quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Comfortably within all limits
    Normal,
    /// At or above 80% of a limit
    Warning,
    /// Resource count has reached the plan maximum
    AtResourceLimit,
    /// Usage minutes have reached the plan maximum
    OverLimit,
    /// Administratively suspended
    Suspended,
}

impl AccountStatus {
    /// All statuses, in classification precedence order.
    pub const ALL: [AccountStatus; 5] = [
        AccountStatus::Suspended,
        AccountStatus::OverLimit,
        AccountStatus::AtResourceLimit,
        AccountStatus::Warning,
        AccountStatus::Normal,
    ];

    /// Statuses an enforcement sweep has to act on or report.
    pub fn needs_enforcement(&self) -> bool {
        matches!(
            self,
            AccountStatus::Suspended | AccountStatus::OverLimit | AccountStatus::AtResourceLimit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Normal => "NORMAL",
            AccountStatus::Warning => "WARNING",
            AccountStatus::AtResourceLimit => "AT_RESOURCE_LIMIT",
            AccountStatus::OverLimit => "OVER_LIMIT",
            AccountStatus::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown account status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for AccountStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Classify an account. First matching rule wins:
///
/// 1. suspended
/// 2. minutes used >= minute limit (inclusive)
/// 3. active resources >= resource limit
/// 4. either quantity >= 80% of its limit
/// 5. normal
///
/// Comparisons run on integers (seconds against `minutes * 60`, and the 80%
/// threshold as `value * 10 >= limit * 8`) so the result never depends on
/// float rounding.
///
/// # Example
/// ```
/// use quota_reconcile::{classify, AccountStatus, PlanLimits, UsageSnapshot};
///
/// let limits = PlanLimits::new(3, 10);
/// let usage = UsageSnapshot::from_minutes(10, 1);
/// assert_eq!(classify(&limits, &usage, false), AccountStatus::OverLimit);
/// ```
pub fn classify(limits: &PlanLimits, usage: &UsageSnapshot, suspended: bool) -> AccountStatus {
    if suspended {
        return AccountStatus::Suspended;
    }

    let used_seconds = usage.usage_seconds;
    let max_seconds = limits.max_usage_seconds();
    if used_seconds >= max_seconds {
        return AccountStatus::OverLimit;
    }

    let resources = u64::from(usage.active_resource_count);
    let max_resources = u64::from(limits.max_resources);
    if resources >= max_resources {
        return AccountStatus::AtResourceLimit;
    }

    let near = |value: u64, limit: u64| {
        value.saturating_mul(WARNING_DENOMINATOR) >= limit.saturating_mul(WARNING_NUMERATOR)
    };
    if near(used_seconds, max_seconds) || near(resources, max_resources) {
        return AccountStatus::Warning;
    }

    AccountStatus::Normal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(resources: u32, minutes: u32) -> PlanLimits {
        PlanLimits::new(resources, minutes)
    }

    #[test]
    fn test_minutes_boundary_is_inclusive() {
        let usage = UsageSnapshot::from_minutes(10, 0);
        assert_eq!(classify(&limits(3, 10), &usage, false), AccountStatus::OverLimit);

        let just_below = UsageSnapshot::new(599, 0);
        assert_eq!(classify(&limits(3, 10), &just_below, false), AccountStatus::Warning);
    }

    #[test]
    fn test_precedence() {
        let over_everything = UsageSnapshot::from_minutes(50, 9);
        assert_eq!(
            classify(&limits(3, 10), &over_everything, true),
            AccountStatus::Suspended
        );
        assert_eq!(
            classify(&limits(3, 10), &over_everything, false),
            AccountStatus::OverLimit
        );

        let at_resources = UsageSnapshot::from_minutes(9, 3);
        assert_eq!(
            classify(&limits(3, 10), &at_resources, false),
            AccountStatus::AtResourceLimit
        );
    }

    #[test]
    fn test_warning_thresholds() {
        // 8 of 10 minutes
        let minutes = UsageSnapshot::from_minutes(8, 0);
        assert_eq!(classify(&limits(10, 10), &minutes, false), AccountStatus::Warning);

        // 4 of 5 resources
        let resources = UsageSnapshot::from_minutes(0, 4);
        assert_eq!(classify(&limits(5, 10), &resources, false), AccountStatus::Warning);

        // 3 of 5 resources, 7 of 10 minutes
        let calm = UsageSnapshot::from_minutes(7, 3);
        assert_eq!(classify(&limits(5, 10), &calm, false), AccountStatus::Normal);
    }

    #[test]
    fn test_zero_limits() {
        let usage = UsageSnapshot::new(0, 0);
        assert_eq!(classify(&limits(0, 0), &usage, false), AccountStatus::OverLimit);
        assert_eq!(
            classify(&limits(0, 10), &usage, false),
            AccountStatus::AtResourceLimit
        );
    }

    #[test]
    fn test_total_and_deterministic() {
        for max_resources in 0..4 {
            for max_minutes in 0..4 {
                for count in 0..5 {
                    for seconds in [0, 59, 60, 61, 120, 179, 180, 240] {
                        for suspended in [false, true] {
                            let l = limits(max_resources, max_minutes);
                            let u = UsageSnapshot::new(seconds, count);
                            let first = classify(&l, &u, suspended);
                            assert_eq!(first, classify(&l, &u, suspended));
                            assert!(AccountStatus::ALL.contains(&first));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            "over_limit".parse::<AccountStatus>().unwrap(),
            AccountStatus::OverLimit
        );
        assert_eq!(
            "AT_RESOURCE_LIMIT".parse::<AccountStatus>().unwrap(),
            AccountStatus::AtResourceLimit
        );
        assert!("LOCKED".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_needs_enforcement() {
        assert!(AccountStatus::Suspended.needs_enforcement());
        assert!(AccountStatus::OverLimit.needs_enforcement());
        assert!(AccountStatus::AtResourceLimit.needs_enforcement());
        assert!(!AccountStatus::Warning.needs_enforcement());
        assert!(!AccountStatus::Normal.needs_enforcement());
    }
}
