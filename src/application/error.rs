//! Errors surfaced by engine operations.

use crate::application::mutator::ValidationError;
use crate::application::ports::StoreError;
use crate::domain::account::AccountId;
use crate::domain::resource::ResourceId;

/// Error returned by engine operations.
///
/// Provider failures never appear here: they are recorded as failed
/// deletion outcomes and retried by the next sweep.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The request was rejected before anything was changed
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Another writer changed the account; retry the whole operation
    #[error("concurrent change to account {account_id}, retry the operation")]
    Conflict { account_id: AccountId },
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),
    #[error("resource {resource_id} does not belong to account {account_id}")]
    ResourceNotOwned {
        resource_id: ResourceId,
        account_id: AccountId,
    },
    /// The store failed in a way the operation cannot recover from
    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl EngineError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict { .. } | EngineError::Storage(StoreError::Unavailable(_))
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => EngineError::AccountNotFound(id),
            StoreError::ResourceNotFound(id) => EngineError::ResourceNotFound(id),
            StoreError::RevisionMismatch { account_id, .. } => {
                EngineError::Conflict { account_id }
            }
            StoreError::ForeignResource {
                resource_id,
                account_id,
            } => EngineError::ResourceNotOwned {
                resource_id,
                account_id,
            },
            other => EngineError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_mismatch_is_conflict() {
        let err: EngineError = StoreError::RevisionMismatch {
            account_id: AccountId::new("a"),
            expected: 1,
            found: 2,
        }
        .into();

        assert!(matches!(err, EngineError::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unavailable_stays_storage() {
        let err: EngineError = StoreError::Unavailable("disk gone".into()).into();
        assert_eq!(
            err.to_string(),
            "storage failure: store unavailable: disk gone"
        );
    }
}
