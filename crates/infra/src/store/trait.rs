use rust_decimal::Decimal;
use thiserror::Error;

use std::sync::Arc;

use tally_core::{AccountNumber, TransactionId};
use tally_ledger::{AccountEntry, BalanceCache, EntryKey, InstructionType, Transaction};

/// Store operation error.
///
/// These are **infrastructure errors** (reachability, constraints, row mapping) as
/// opposed to domain errors (validation, invariants).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable, pool exhausted/closed, or an internal lock was poisoned.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write violated a store-level constraint (e.g. duplicate entry identity).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A stored row could not be mapped back to a record.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

/// Append-only ledger of account entries.
///
/// Implementations must make an append durable before returning `Ok`, and a later
/// `sum_amount`/`entries` for the same account must observe every append that has
/// already returned (read-your-writes per account).
pub trait LedgerStore: Send + Sync {
    /// Append one entry. An entry whose `(transaction_id, transaction_type)` already
    /// exists is rejected with [`StoreError::Constraint`].
    fn append(&self, entry: &AccountEntry) -> Result<(), StoreError>;

    /// Sum of `amount` over the account's entries of one type (zero when none).
    fn sum_amount(
        &self,
        acc_number: AccountNumber,
        transaction_type: InstructionType,
    ) -> Result<Decimal, StoreError>;

    fn find(&self, key: &EntryKey) -> Result<Option<AccountEntry>, StoreError>;

    /// All entries of an account, oldest first.
    fn entries(&self, acc_number: AccountNumber) -> Result<Vec<AccountEntry>, StoreError>;
}

/// Single-row-per-account balance cache.
pub trait CacheStore: Send + Sync {
    fn get(&self, acc_number: AccountNumber) -> Result<Option<BalanceCache>, StoreError>;

    /// Insert or replace the row keyed by `row.acc_number`.
    fn upsert(&self, row: &BalanceCache) -> Result<(), StoreError>;
}

/// Transaction lifecycle records.
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction; an existing id is a [`StoreError::Constraint`].
    fn save(&self, tx: &Transaction) -> Result<(), StoreError>;

    fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Replace an existing transaction; a missing id is a [`StoreError::Constraint`].
    fn update(&self, tx: &Transaction) -> Result<(), StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn append(&self, entry: &AccountEntry) -> Result<(), StoreError> {
        (**self).append(entry)
    }

    fn sum_amount(
        &self,
        acc_number: AccountNumber,
        transaction_type: InstructionType,
    ) -> Result<Decimal, StoreError> {
        (**self).sum_amount(acc_number, transaction_type)
    }

    fn find(&self, key: &EntryKey) -> Result<Option<AccountEntry>, StoreError> {
        (**self).find(key)
    }

    fn entries(&self, acc_number: AccountNumber) -> Result<Vec<AccountEntry>, StoreError> {
        (**self).entries(acc_number)
    }
}

impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    fn get(&self, acc_number: AccountNumber) -> Result<Option<BalanceCache>, StoreError> {
        (**self).get(acc_number)
    }

    fn upsert(&self, row: &BalanceCache) -> Result<(), StoreError> {
        (**self).upsert(row)
    }
}

impl<S> TransactionStore for Arc<S>
where
    S: TransactionStore + ?Sized,
{
    fn save(&self, tx: &Transaction) -> Result<(), StoreError> {
        (**self).save(tx)
    }

    fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        (**self).get(transaction_id)
    }

    fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
        (**self).update(tx)
    }
}
