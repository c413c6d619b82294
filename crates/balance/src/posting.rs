//! Transaction lifecycle on top of the balance engine.
//!
//! Every instruction gets a `Transaction` record that is saved as NEW before any
//! ledger work and moved to a terminal state afterwards:
//!
//! - COMPLETED: the entry is booked and the cache updated. A booked entry is
//!   reported as COMPLETED even if the status write afterwards fails; the stored
//!   row then stays NEW and the failure is logged.
//! - FAILED: nothing was booked (lock not granted, request rejected).
//! - ERROR: a store failed while booking.
//!
//! A local transfer runs as two single-account postings; each leg holds only its
//! own account's locks. If the credit leg fails, the debit leg is reversed.

use tracing::{error, info, instrument, warn};

use tally_core::{DomainError, TransactionId};
use tally_infra::lock::LockManager;
use tally_infra::store::{CacheStore, LedgerStore, TransactionStore};
use tally_ledger::{
    AccountEntry, EntryKey, InstructionDto, LocalTransferInstructionDto, Transaction,
    TransactionStatus, TransactionStatusDto,
};

use crate::engine::BalanceEngine;
use crate::error::BalanceError;

/// Outcome of both legs of a local transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub debit: TransactionStatusDto,
    pub credit: TransactionStatusDto,
}

#[derive(Debug)]
pub struct PostingService<L, C, M, T> {
    engine: BalanceEngine<L, C, M>,
    transactions: T,
}

impl<L, C, M, T> PostingService<L, C, M, T>
where
    L: LedgerStore,
    C: CacheStore,
    M: LockManager,
    T: TransactionStore,
{
    pub fn new(engine: BalanceEngine<L, C, M>, transactions: T) -> Self {
        Self {
            engine,
            transactions,
        }
    }

    pub fn engine(&self) -> &BalanceEngine<L, C, M> {
        &self.engine
    }

    /// Book one instruction on its account.
    ///
    /// An instruction that fails validation is rejected before any transaction is
    /// recorded.
    #[instrument(
        skip(self, instruction),
        fields(acc_number = %instruction.acc_number, kind = %instruction.instruction_type),
        err
    )]
    pub fn post(&self, instruction: &InstructionDto) -> Result<TransactionStatusDto, BalanceError> {
        let mut tx = Transaction::from_instruction(instruction)?;
        self.transactions.save(&tx)?;

        let entry = tx.to_entry()?;
        self.book(&mut tx, &entry)
    }

    /// Book the compensating entry of a completed transaction.
    ///
    /// The reversal is its own transaction whose parent is `transaction_id`. A
    /// transaction can be reversed once; a second attempt hits the ledger's entry
    /// identity constraint.
    #[instrument(skip_all, fields(transaction_id = %transaction_id), err)]
    pub fn reverse(&self, transaction_id: TransactionId) -> Result<TransactionStatusDto, BalanceError> {
        let original = self
            .transactions
            .get(transaction_id)?
            .ok_or_else(|| DomainError::not_found(format!("transaction {transaction_id}")))?;

        if original.status() != TransactionStatus::Completed {
            return Err(DomainError::invariant(format!(
                "transaction {transaction_id} is {}, only completed transactions can be reversed",
                original.status().as_str()
            ))
            .into());
        }

        let booked = self
            .engine
            .find_entry(&EntryKey {
                transaction_id,
                transaction_type: original.instruction_type(),
            })?
            .ok_or_else(|| {
                DomainError::invariant(format!("no ledger entry booked for transaction {transaction_id}"))
            })?;

        let mut reversal = Transaction::compensating(&original);
        self.transactions.save(&reversal)?;
        self.book(&mut reversal, &booked.compensating_entry())
    }

    /// Debit one account and credit another.
    #[instrument(
        skip(self, transfer),
        fields(from = %transfer.from_acc_number, to = %transfer.to_acc_number),
        err
    )]
    pub fn transfer(
        &self,
        transfer: &LocalTransferInstructionDto,
    ) -> Result<TransferOutcome, BalanceError> {
        transfer.validate()?;

        let debit = self.post(&transfer.to_debit_instruction())?;

        match self.post(&transfer.to_credit_instruction()) {
            Ok(credit) => Ok(TransferOutcome { debit, credit }),
            Err(err) => {
                warn!(error = %err, "credit leg failed; reversing debit leg");
                if let Err(reverse_err) = self.reverse(debit.transaction_id) {
                    error!(
                        transaction_id = %debit.transaction_id,
                        error = %reverse_err,
                        "debit leg could not be reversed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Current status of a transaction; `UNKNOWN` when no such transaction exists.
    pub fn status(&self, transaction_id: TransactionId) -> Result<TransactionStatusDto, BalanceError> {
        Ok(self
            .transactions
            .get(transaction_id)?
            .map(|tx| tx.status_dto())
            .unwrap_or_else(|| TransactionStatusDto::unknown(transaction_id)))
    }

    fn book(
        &self,
        tx: &mut Transaction,
        entry: &AccountEntry,
    ) -> Result<TransactionStatusDto, BalanceError> {
        match self.engine.post_entry(entry) {
            Ok(row) => {
                // Booked. A failed status write is logged, never returned.
                tx.complete()?;
                if let Err(store_err) = self.transactions.update(tx) {
                    error!(
                        transaction_id = %tx.transaction_id(),
                        error = %store_err,
                        "entry booked but completed status not recorded"
                    );
                }
                info!(
                    transaction_id = %tx.transaction_id(),
                    balance = %row.balance_amount,
                    "transaction completed"
                );
                Ok(tx.status_dto())
            }
            Err(err) => {
                let message = err.to_string();
                match &err {
                    BalanceError::Persistence(_) | BalanceError::ConsistencyDrift { .. } => {
                        tx.error(message)?
                    }
                    BalanceError::LockTimeout { .. }
                    | BalanceError::Lock(_)
                    | BalanceError::Domain(_) => tx.fail(message)?,
                }

                if let Err(store_err) = self.transactions.update(tx) {
                    error!(
                        transaction_id = %tx.transaction_id(),
                        error = %store_err,
                        "failed to record transaction outcome"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tally_core::AccountNumber;
    use tally_infra::config::LockTimeouts;
    use tally_infra::lock::InMemoryLockManager;
    use tally_infra::store::{
        InMemoryCacheStore, InMemoryLedgerStore, InMemoryTransactionStore, StoreError,
    };
    use tally_ledger::InstructionType;

    type TestService = PostingService<
        InMemoryLedgerStore,
        InMemoryCacheStore,
        InMemoryLockManager,
        InMemoryTransactionStore,
    >;

    fn service() -> TestService {
        let engine = BalanceEngine::new(
            InMemoryLedgerStore::new(),
            InMemoryCacheStore::new(),
            InMemoryLockManager::new(),
        )
        .with_timeouts(LockTimeouts {
            update_balance: Duration::from_millis(100),
            entry_append: Duration::from_millis(50),
        });
        PostingService::new(engine, InMemoryTransactionStore::new())
    }

    fn instruction(acc: i64, kind: InstructionType, amount: rust_decimal::Decimal) -> InstructionDto {
        InstructionDto::new(
            AccountNumber::new(acc),
            amount,
            kind,
            Some("Tuition Fees".to_string()),
        )
    }

    #[test]
    fn post_books_entry_and_completes() {
        let service = service();
        let status = service
            .post(&instruction(42, InstructionType::Credit, dec!(500)))
            .unwrap();

        assert_eq!(status.status, TransactionStatus::Completed);
        assert!(status.end_time.is_some());
        assert_eq!(service.engine().get_balance(AccountNumber::new(42)), dec!(500));
        assert_eq!(service.status(status.transaction_id).unwrap(), status);
    }

    #[test]
    fn invalid_instruction_is_rejected_without_record() {
        let service = service();
        let err = service
            .post(&instruction(1, InstructionType::Debit, dec!(0)))
            .unwrap_err();
        assert!(matches!(err, BalanceError::Domain(DomainError::Validation(_))));
        assert!(service.engine().ledger().entries(AccountNumber::new(1)).unwrap().is_empty());
    }

    #[test]
    fn lock_timeout_books_nothing() {
        let service = service();
        let acc = AccountNumber::new(77);
        let held = service.engine().acquire_account_entry_lock(acc).unwrap();

        let err = service
            .post(&instruction(77, InstructionType::Credit, dec!(5)))
            .unwrap_err();
        assert!(err.is_retryable());
        drop(held);

        assert!(service.engine().ledger().entries(acc).unwrap().is_empty());
        assert_eq!(service.engine().get_balance(acc), rust_decimal::Decimal::ZERO);
    }

    #[test]
    fn reverse_restores_previous_balance() {
        let service = service();
        let acc = AccountNumber::new(42);

        service
            .post(&instruction(42, InstructionType::Credit, dec!(700)))
            .unwrap();
        let debit = service
            .post(&instruction(42, InstructionType::Debit, dec!(300)))
            .unwrap();
        assert_eq!(service.engine().get_balance(acc), dec!(400));

        let reversal = service.reverse(debit.transaction_id).unwrap();
        assert_eq!(reversal.status, TransactionStatus::Completed);
        assert_eq!(service.engine().get_balance(acc), dec!(700));
        assert_eq!(service.engine().refresh_cache(acc).unwrap().balance_amount, dec!(700));

        // Second reversal collides with the already-booked compensating entry.
        let err = service.reverse(debit.transaction_id).unwrap_err();
        assert!(matches!(err, BalanceError::Persistence(_)));
        assert_eq!(service.engine().get_balance(acc), dec!(700));
    }

    #[test]
    fn reverse_of_unknown_transaction_is_not_found() {
        let service = service();
        let err = service.reverse(TransactionId::new()).unwrap_err();
        assert!(matches!(err, BalanceError::Domain(DomainError::NotFound(_))));
    }

    #[test]
    fn transfer_moves_funds_between_accounts() {
        let service = service();
        service
            .post(&instruction(1, InstructionType::Credit, dec!(100)))
            .unwrap();

        let outcome = service
            .transfer(&LocalTransferInstructionDto {
                from_acc_number: AccountNumber::new(1),
                to_acc_number: AccountNumber::new(2),
                amount: dec!(40),
                description: None,
            })
            .unwrap();

        assert_eq!(outcome.debit.status, TransactionStatus::Completed);
        assert_eq!(outcome.credit.status, TransactionStatus::Completed);
        assert_eq!(service.engine().get_balance(AccountNumber::new(1)), dec!(60));
        assert_eq!(service.engine().get_balance(AccountNumber::new(2)), dec!(40));
    }

    #[test]
    fn failed_credit_leg_reverses_debit() {
        let service = service();
        let to = AccountNumber::new(2);
        let held = service.engine().acquire_account_entry_lock(to).unwrap();

        let err = service
            .transfer(&LocalTransferInstructionDto {
                from_acc_number: AccountNumber::new(1),
                to_acc_number: to,
                amount: dec!(40),
                description: None,
            })
            .unwrap_err();
        drop(held);

        assert!(matches!(err, BalanceError::LockTimeout { .. }));
        assert_eq!(service.engine().get_balance(AccountNumber::new(1)), dec!(0));
        assert_eq!(service.engine().get_balance(to), dec!(0));
        assert_eq!(service.engine().ledger().entries(AccountNumber::new(1)).unwrap().len(), 2);
    }

    /// Transaction store whose `update` fails on one chosen call.
    #[derive(Debug, Default)]
    struct FlakyTransactions {
        inner: InMemoryTransactionStore,
        updates: AtomicUsize,
        fail_on: usize,
    }

    impl TransactionStore for FlakyTransactions {
        fn save(&self, tx: &Transaction) -> Result<(), StoreError> {
            self.inner.save(tx)
        }

        fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StoreError> {
            self.inner.get(transaction_id)
        }

        fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
            let call = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(StoreError::Unavailable("transaction store down".to_string()));
            }
            self.inner.update(tx)
        }
    }

    #[test]
    fn unrecorded_completion_does_not_reverse_transfer() {
        let engine = BalanceEngine::new(
            InMemoryLedgerStore::new(),
            InMemoryCacheStore::new(),
            InMemoryLockManager::new(),
        );
        // Second update is the credit leg's COMPLETED write.
        let service = PostingService::new(
            engine,
            FlakyTransactions {
                fail_on: 2,
                ..FlakyTransactions::default()
            },
        );
        let from = AccountNumber::new(1);
        let to = AccountNumber::new(2);

        let outcome = service
            .transfer(&LocalTransferInstructionDto {
                from_acc_number: from,
                to_acc_number: to,
                amount: dec!(40),
                description: None,
            })
            .unwrap();

        assert_eq!(outcome.credit.status, TransactionStatus::Completed);
        assert_eq!(service.engine().get_balance(from), dec!(-40));
        assert_eq!(service.engine().get_balance(to), dec!(40));
        assert_eq!(
            service.engine().get_balance(from) + service.engine().get_balance(to),
            dec!(0)
        );
        assert_eq!(service.engine().ledger().entries(from).unwrap().len(), 1);
        assert_eq!(
            service.status(outcome.credit.transaction_id).unwrap().status,
            TransactionStatus::New
        );
    }

    #[test]
    fn unknown_status_for_missing_transaction() {
        let service = service();
        let id = TransactionId::new();
        assert_eq!(service.status(id).unwrap().status, TransactionStatus::Unknown);
    }
}
