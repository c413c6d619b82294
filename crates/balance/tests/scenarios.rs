//! End-to-end balance scenarios over the in-memory backends.

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tally_balance::{BalanceEngine, PostingService};
use tally_core::{AccountNumber, TransactionId};
use tally_infra::config::LockTimeouts;
use tally_infra::lock::InMemoryLockManager;
use tally_infra::store::{
    CacheStore, InMemoryCacheStore, InMemoryLedgerStore, InMemoryTransactionStore, LedgerStore,
};
use tally_ledger::{
    AccountEntry, InstructionDto, InstructionType, TransactionStatus, UpdatedRef,
};

type Engine = BalanceEngine<InMemoryLedgerStore, InMemoryCacheStore, InMemoryLockManager>;

fn engine() -> Engine {
    BalanceEngine::new(
        InMemoryLedgerStore::new(),
        InMemoryCacheStore::new(),
        InMemoryLockManager::new(),
    )
    .with_timeouts(LockTimeouts {
        update_balance: Duration::from_millis(200),
        entry_append: Duration::from_millis(100),
    })
}

fn entry(acc: AccountNumber, kind: InstructionType, amount: Decimal) -> AccountEntry {
    AccountEntry::new(acc, amount, Utc::now(), TransactionId::new(), kind, None).unwrap()
}

fn kind() -> impl Strategy<Value = InstructionType> {
    prop_oneof![Just(InstructionType::Credit), Just(InstructionType::Debit)]
}

/// Positive amounts with two decimal places.
fn amount() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

#[test]
fn tuition_fee_walkthrough() {
    let engine = engine();
    let acc = AccountNumber::new(42);

    // A lone first debit seeds a negative balance.
    let row = engine
        .post_entry(&entry(acc, InstructionType::Debit, dec!(300)))
        .unwrap();
    assert_eq!(row.balance_amount, dec!(-300));

    let credit = entry(acc, InstructionType::Credit, dec!(700));
    let row = engine.post_entry(&credit).unwrap();
    assert_eq!(row.balance_amount, dec!(400));
    assert_eq!(row.updated_ref, UpdatedRef::Transaction(credit.transaction_id));

    let row = engine.refresh_cache(acc).unwrap();
    assert_eq!(row.balance_amount, dec!(400));
    assert_eq!(row.updated_ref, UpdatedRef::Recompute);
    assert_eq!(row.updated_ref.to_string(), "cache update");
}

#[test]
fn posting_service_keeps_ledger_and_cache_in_step() {
    let service = PostingService::new(engine(), InMemoryTransactionStore::new());
    let acc = AccountNumber::new(1001);

    for (kind, amount) in [
        (InstructionType::Credit, dec!(1200.50)),
        (InstructionType::Debit, dec!(200.25)),
        (InstructionType::Debit, dec!(99.99)),
    ] {
        let status = service
            .post(&InstructionDto::new(acc, amount, kind, Some("fees".to_string())))
            .unwrap();
        assert_eq!(status.status, TransactionStatus::Completed);
    }

    assert_eq!(service.engine().get_balance(acc), dec!(900.26));
    assert_eq!(service.engine().check_consistency(acc).unwrap(), dec!(900.26));
}

proptest! {
    #[test]
    fn refresh_matches_signed_ledger_sum(
        ops in prop::collection::vec((kind(), amount()), 1..40)
    ) {
        let engine = engine();
        let acc = AccountNumber::new(1);
        let mut expected = Decimal::ZERO;

        for (kind, amount) in &ops {
            engine.ledger().append(&entry(acc, *kind, *amount)).unwrap();
            expected += kind.signed(*amount);
        }

        let row = engine.refresh_cache(acc).unwrap();
        prop_assert_eq!(row.balance_amount, expected);
        prop_assert_eq!(engine.get_balance(acc), expected);
    }

    #[test]
    fn incremental_updates_agree_with_recompute(
        ops in prop::collection::vec((kind(), amount()), 1..40)
    ) {
        let engine = engine();
        let acc = AccountNumber::new(2);

        for (kind, amount) in &ops {
            engine.post_entry(&entry(acc, *kind, *amount)).unwrap();
        }

        let incremental = engine.get_balance(acc);
        prop_assert_eq!(engine.check_consistency(acc).unwrap(), incremental);
        prop_assert_eq!(engine.refresh_cache(acc).unwrap().balance_amount, incremental);
    }

    #[test]
    fn sequential_update_balance_matches_refresh(
        ops in prop::collection::vec((kind(), amount()), 1..40)
    ) {
        let engine = engine();
        let acc = AccountNumber::new(4);

        for (kind, amount) in &ops {
            let e = entry(acc, *kind, *amount);
            engine.ledger().append(&e).unwrap();
            engine.update_balance(&e).unwrap();
        }

        let incremental = engine.get_balance(acc);
        prop_assert_eq!(engine.refresh_cache(acc).unwrap().balance_amount, incremental);
    }

    #[test]
    fn compensating_entry_restores_balance(
        ops in prop::collection::vec((kind(), amount()), 0..20),
        last in (kind(), amount()),
    ) {
        let engine = engine();
        let acc = AccountNumber::new(3);

        for (kind, amount) in &ops {
            engine.post_entry(&entry(acc, *kind, *amount)).unwrap();
        }
        let before = engine.get_balance(acc);

        let booked = entry(acc, last.0, last.1);
        engine.post_entry(&booked).unwrap();
        engine.post_entry(&booked.compensating_entry()).unwrap();

        prop_assert_eq!(engine.get_balance(acc), before);
        prop_assert_eq!(engine.check_consistency(acc).unwrap(), before);
    }

    #[test]
    fn accounts_are_independent(
        a_ops in prop::collection::vec((kind(), amount()), 1..15),
        b_ops in prop::collection::vec((kind(), amount()), 1..15),
    ) {
        let engine = engine();
        let a = AccountNumber::new(10);
        let b = AccountNumber::new(11);

        for (kind, amount) in &a_ops {
            engine.post_entry(&entry(a, *kind, *amount)).unwrap();
        }
        let a_balance = engine.get_balance(a);
        for (kind, amount) in &b_ops {
            engine.post_entry(&entry(b, *kind, *amount)).unwrap();
        }

        prop_assert_eq!(engine.get_balance(a), a_balance);
        prop_assert!(engine.cache().get(b).unwrap().is_some());
    }
}
