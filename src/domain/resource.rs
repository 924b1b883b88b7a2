//! Externally-backed resources and their lifecycle.
//!
//! ```text
//! Active ──mark──▶ MarkedForDeletion ──external ok / not found──▶ Expired
//!   ▲                      │
//!   └──── usage reset ─────┘
//! ```
//!
//! `Expired` is terminal and the row is kept for audit.

use crate::domain::account::{AccountId, Actor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local identifier of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of the mirrored resource at the external provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    MarkedForDeletion,
    Expired,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Active => "active",
            LifecycleState::MarkedForDeletion => "marked_for_deletion",
            LifecycleState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Why a resource was marked for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    AdminLimitReduction,
    UserSuspended,
    MinutesLimitExceeded,
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeletionReason::AdminLimitReduction => "admin_limit_reduction",
            DeletionReason::UserSuspended => "user_suspended",
            DeletionReason::MinutesLimitExceeded => "minutes_limit_exceeded",
        };
        f.write_str(name)
    }
}

/// Error returned for a lifecycle transition that is not allowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("resource {resource_id} cannot go from {from} to {to}")]
pub struct TransitionError {
    pub resource_id: ResourceId,
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// A quota-counted unit mirrored at the external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub account_id: AccountId,
    pub external_id: Option<ExternalId>,
    pub state: LifecycleState,
    pub deletion_reason: Option<DeletionReason>,
    pub marked_by: Option<Actor>,
    pub marked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Resource {
    /// Create an active resource.
    pub fn new(
        id: impl Into<ResourceId>,
        account_id: AccountId,
        external_id: Option<ExternalId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id,
            external_id,
            state: LifecycleState::Active,
            deletion_reason: None,
            marked_by: None,
            marked_at: None,
            created_at,
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn is_marked(&self) -> bool {
        self.state == LifecycleState::MarkedForDeletion
    }

    pub fn is_expired(&self) -> bool {
        self.state == LifecycleState::Expired
    }

    fn transition_error(&self, to: LifecycleState) -> TransitionError {
        TransitionError {
            resource_id: self.id.clone(),
            from: self.state,
            to,
        }
    }

    /// Active → MarkedForDeletion, recording who and why.
    pub fn mark_for_deletion(
        &mut self,
        reason: DeletionReason,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.is_active() {
            return Err(self.transition_error(LifecycleState::MarkedForDeletion));
        }
        self.state = LifecycleState::MarkedForDeletion;
        self.deletion_reason = Some(reason);
        self.marked_by = Some(actor.clone());
        self.marked_at = Some(at);
        Ok(())
    }

    /// MarkedForDeletion → Expired, once the provider no longer has it.
    pub fn expire(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.is_marked() {
            return Err(self.transition_error(LifecycleState::Expired));
        }
        self.state = LifecycleState::Expired;
        self.deleted_at = Some(at);
        Ok(())
    }

    /// MarkedForDeletion → Active. Expired resources are gone and stay gone.
    pub fn reactivate(&mut self) -> Result<(), TransitionError> {
        if !self.is_marked() {
            return Err(self.transition_error(LifecycleState::Active));
        }
        self.state = LifecycleState::Active;
        self.deletion_reason = None;
        self.marked_by = None;
        self.marked_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> Resource {
        Resource::new(
            "r1",
            AccountId::new("acct"),
            Some(ExternalId::new("ext-1")),
            Utc::now(),
        )
    }

    #[test]
    fn test_full_lifecycle() {
        let mut r = resource();
        let actor = Actor::new("admin@example.com");
        let now = Utc::now();

        r.mark_for_deletion(DeletionReason::AdminLimitReduction, &actor, now)
            .unwrap();
        assert!(r.is_marked());
        assert_eq!(r.marked_by.as_ref(), Some(&actor));
        assert_eq!(r.deletion_reason, Some(DeletionReason::AdminLimitReduction));

        r.expire(now).unwrap();
        assert!(r.is_expired());
        assert_eq!(r.deleted_at, Some(now));
    }

    #[test]
    fn test_cannot_mark_twice() {
        let mut r = resource();
        let actor = Actor::system();
        r.mark_for_deletion(DeletionReason::UserSuspended, &actor, Utc::now())
            .unwrap();

        let err = r
            .mark_for_deletion(DeletionReason::UserSuspended, &actor, Utc::now())
            .unwrap_err();
        assert_eq!(err.from, LifecycleState::MarkedForDeletion);
    }

    #[test]
    fn test_expired_is_terminal() {
        let mut r = resource();
        r.mark_for_deletion(DeletionReason::UserSuspended, &Actor::system(), Utc::now())
            .unwrap();
        r.expire(Utc::now()).unwrap();

        assert!(r.reactivate().is_err());
        assert!(r.expire(Utc::now()).is_err());
        assert!(r.is_expired());
    }

    #[test]
    fn test_reactivate_clears_mark() {
        let mut r = resource();
        r.mark_for_deletion(
            DeletionReason::MinutesLimitExceeded,
            &Actor::system(),
            Utc::now(),
        )
        .unwrap();
        r.reactivate().unwrap();

        assert!(r.is_active());
        assert!(r.deletion_reason.is_none());
        assert!(r.marked_by.is_none());
    }

    #[test]
    fn test_active_cannot_expire_directly() {
        let mut r = resource();
        assert!(r.expire(Utc::now()).is_err());
    }
}
