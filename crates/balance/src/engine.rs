//! Balance Consistency Engine.
//!
//! ## Locking protocol
//!
//! Each account has two named locks:
//!
//! - **A** `"{acc}_UPDATE_BALANCE_LOCK"`: guards the account's cache row.
//! - **B** `"{acc}_DEBIT_ENTRY_LOCK"`: guards appends to the account's ledger.
//!
//! `update_balance`, `refresh_cache` and `check_consistency` take A only. The
//! append path takes A, then B, and releases B, then A. No caller ever takes B
//! without already holding A, and no operation holds locks of two accounts at
//! once, so the fixed order rules out deadlock.
//!
//! Locks are held through [`LockGuard`]s, so they are released on every exit path,
//! including a failed store write.
//!
//! ## Reads
//!
//! `get_balance` takes no lock. It may observe a cache row that a concurrent
//! writer is about to replace.

use rust_decimal::Decimal;
use tracing::{debug, error, instrument, warn};

use tally_core::AccountNumber;
use tally_infra::config::LockTimeouts;
use tally_infra::lock::{LockGuard, LockManager};
use tally_infra::store::{CacheStore, LedgerStore};
use tally_ledger::{AccountEntry, BalanceCache, EntryKey, InstructionType};

use crate::error::BalanceError;

/// Name of lock A for an account.
pub fn update_lock_name(acc_number: AccountNumber) -> String {
    format!("{acc_number}_UPDATE_BALANCE_LOCK")
}

/// Name of lock B for an account.
pub fn entry_lock_name(acc_number: AccountNumber) -> String {
    format!("{acc_number}_DEBIT_ENTRY_LOCK")
}

/// Both locks of one account, held together.
///
/// Fields drop in declaration order, so dropping this releases B before A.
#[must_use = "the account is unlocked as soon as this is dropped"]
#[derive(Debug)]
pub struct AccountEntryLock<'a, M: LockManager> {
    entry: LockGuard<'a, M>,
    update: LockGuard<'a, M>,
    acc_number: AccountNumber,
}

impl<M: LockManager> AccountEntryLock<'_, M> {
    pub fn acc_number(&self) -> AccountNumber {
        self.acc_number
    }

    /// Release B then A, reporting the first failure.
    pub fn release(self) -> Result<(), BalanceError> {
        let AccountEntryLock { entry, update, .. } = self;
        let entry_released = entry.release();
        let update_released = update.release();
        entry_released.and(update_released).map_err(Into::into)
    }
}

/// Keeps each account's balance cache reconcilable with its ledger.
///
/// Stores and the lock manager are injected, so tests run against in-memory
/// doubles and deployments against Postgres.
#[derive(Debug)]
pub struct BalanceEngine<L, C, M> {
    ledger: L,
    cache: C,
    locks: M,
    timeouts: LockTimeouts,
}

impl<L, C, M> BalanceEngine<L, C, M>
where
    L: LedgerStore,
    C: CacheStore,
    M: LockManager,
{
    pub fn new(ledger: L, cache: C, locks: M) -> Self {
        Self {
            ledger,
            cache,
            locks,
            timeouts: LockTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: LockTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> LockTimeouts {
        self.timeouts
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn locks(&self) -> &M {
        &self.locks
    }

    /// Cached balance without locking; zero when the account has no cache row.
    ///
    /// Never fails: a cache read error is logged and also reported as zero. Use
    /// [`try_get_balance`](Self::try_get_balance) to see store failures.
    pub fn get_balance(&self, acc_number: AccountNumber) -> Decimal {
        match self.try_get_balance(acc_number) {
            Ok(balance) => balance,
            Err(err) => {
                error!(%acc_number, error = %err, "balance cache read failed; reporting zero");
                Decimal::ZERO
            }
        }
    }

    pub fn try_get_balance(&self, acc_number: AccountNumber) -> Result<Decimal, BalanceError> {
        Ok(self
            .cache
            .get(acc_number)?
            .map(|row| row.balance_amount)
            .unwrap_or(Decimal::ZERO))
    }

    /// Apply one entry to its account's cached balance under lock A.
    #[instrument(
        skip(self, entry),
        fields(acc_number = %entry.acc_number, transaction_id = %entry.transaction_id),
        err
    )]
    pub fn update_balance(&self, entry: &AccountEntry) -> Result<BalanceCache, BalanceError> {
        let _lock = self.acquire_update_lock(entry.acc_number)?;
        self.apply_entry(entry)
    }

    /// Recompute the account's balance from the full ledger under lock A and
    /// overwrite the cache row.
    #[instrument(skip_all, fields(acc_number = %acc_number), err)]
    pub fn refresh_cache(&self, acc_number: AccountNumber) -> Result<BalanceCache, BalanceError> {
        let _lock = self.acquire_update_lock(acc_number)?;
        self.recompute(acc_number)
    }

    /// Compare the cached balance with the ledger aggregate under lock A.
    ///
    /// Returns the ledger balance when they agree. On disagreement the cache is
    /// left as is and [`BalanceError::ConsistencyDrift`] is returned.
    #[instrument(skip_all, fields(acc_number = %acc_number))]
    pub fn check_consistency(&self, acc_number: AccountNumber) -> Result<Decimal, BalanceError> {
        let _lock = self.acquire_update_lock(acc_number)?;

        let ledger = self.ledger_balance(acc_number)?;
        let cached = self
            .cache
            .get(acc_number)?
            .map(|row| row.balance_amount)
            .unwrap_or(Decimal::ZERO);

        if cached != ledger {
            warn!(%acc_number, %cached, %ledger, "balance cache drift detected");
            return Err(BalanceError::ConsistencyDrift {
                acc_number,
                cached,
                ledger,
            });
        }
        Ok(ledger)
    }

    /// Take lock A then lock B for an account.
    ///
    /// If B times out, A is released before returning.
    pub fn acquire_account_entry_lock(
        &self,
        acc_number: AccountNumber,
    ) -> Result<AccountEntryLock<'_, M>, BalanceError> {
        let update = self.acquire_update_lock(acc_number)?;
        let entry = LockGuard::acquire(
            &self.locks,
            &entry_lock_name(acc_number),
            self.timeouts.entry_append,
        )?;
        Ok(AccountEntryLock {
            entry,
            update,
            acc_number,
        })
    }

    /// Append an entry to the ledger and apply it to the cache, holding both of
    /// the account's locks throughout.
    #[instrument(
        skip(self, entry),
        fields(acc_number = %entry.acc_number, transaction_id = %entry.transaction_id),
        err
    )]
    pub fn post_entry(&self, entry: &AccountEntry) -> Result<BalanceCache, BalanceError> {
        let _lock = self.acquire_account_entry_lock(entry.acc_number)?;

        self.ledger.append(entry)?;

        match self.apply_entry(entry) {
            Ok(row) => Ok(row),
            Err(err) => {
                // The entry is booked; bring the cache back in line with the ledger.
                warn!(error = %err, "incremental update failed after append; recomputing");
                self.recompute(entry.acc_number).map_err(|_| err)
            }
        }
    }

    pub fn find_entry(&self, key: &EntryKey) -> Result<Option<AccountEntry>, BalanceError> {
        Ok(self.ledger.find(key)?)
    }

    fn acquire_update_lock(
        &self,
        acc_number: AccountNumber,
    ) -> Result<LockGuard<'_, M>, BalanceError> {
        LockGuard::acquire(
            &self.locks,
            &update_lock_name(acc_number),
            self.timeouts.update_balance,
        )
        .map_err(|err| {
            warn!(%acc_number, error = %err, "balance update lock not acquired");
            BalanceError::from(err)
        })
    }

    /// Incremental path. Caller must hold lock A for the entry's account.
    fn apply_entry(&self, entry: &AccountEntry) -> Result<BalanceCache, BalanceError> {
        let row = match self.cache.get(entry.acc_number)? {
            Some(current) => current.applied(entry),
            None => {
                debug!("no cache row; seeding from entry");
                BalanceCache::seeded(entry)
            }
        };
        self.cache.upsert(&row)?;
        Ok(row)
    }

    /// Full recompute. Caller must hold lock A for the account.
    fn recompute(&self, acc_number: AccountNumber) -> Result<BalanceCache, BalanceError> {
        let total_credit = self.ledger.sum_amount(acc_number, InstructionType::Credit)?;
        let total_debit = self.ledger.sum_amount(acc_number, InstructionType::Debit)?;
        let row = BalanceCache::recomputed(acc_number, total_credit, total_debit);
        self.cache.upsert(&row)?;
        Ok(row)
    }

    fn ledger_balance(&self, acc_number: AccountNumber) -> Result<Decimal, BalanceError> {
        let total_credit = self.ledger.sum_amount(acc_number, InstructionType::Credit)?;
        let total_debit = self.ledger.sum_amount(acc_number, InstructionType::Debit)?;
        Ok(total_credit - total_debit)
    }
}
