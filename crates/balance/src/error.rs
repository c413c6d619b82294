use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use tally_core::{AccountNumber, DomainError};
use tally_infra::lock::LockError;
use tally_infra::store::StoreError;

/// Failure of a balance operation.
///
/// A missing cache row is not an error: balances resolve to zero.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BalanceError {
    /// The account lock was not granted in time. Nothing was mutated, so the
    /// call can be retried as-is.
    #[error("timed out after {waited:?} waiting for lock '{name}'")]
    LockTimeout { name: String, waited: Duration },

    /// Any other lock manager failure (release of an unheld name, backend down).
    #[error("lock failure: {0}")]
    Lock(LockError),

    /// The ledger or cache store failed (unreachable or constraint violated).
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// The cached balance disagrees with the ledger aggregate.
    #[error("balance cache drift on account {acc_number}: cached {cached}, ledger {ledger}")]
    ConsistencyDrift {
        acc_number: AccountNumber,
        cached: Decimal,
        ledger: Decimal,
    },

    /// The request itself was rejected (validation, unknown transaction, ...).
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl BalanceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BalanceError::LockTimeout { .. })
    }
}

impl From<LockError> for BalanceError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Timeout { name, waited } => BalanceError::LockTimeout { name, waited },
            other => BalanceError::Lock(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_is_distinct_and_retryable() {
        let err: BalanceError = LockError::Timeout {
            name: "42_UPDATE_BALANCE_LOCK".to_string(),
            waited: Duration::from_millis(5000),
        }
        .into();
        assert!(matches!(err, BalanceError::LockTimeout { .. }));
        assert!(err.is_retryable());

        let err: BalanceError = LockError::NotHeld("x".to_string()).into();
        assert!(matches!(err, BalanceError::Lock(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_errors_are_persistence_failures() {
        let err: BalanceError = StoreError::Unavailable("down".to_string()).into();
        assert_eq!(err.to_string(), "persistence failure: store unavailable: down");
        assert!(!err.is_retryable());
    }
}
