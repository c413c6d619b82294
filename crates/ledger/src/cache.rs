//! Materialized per-account balance.
//!
//! A `BalanceCache` row is a view over the account's ledger entries. It is never
//! authoritative: a full recompute from the ledger can always replace it.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountNumber, DomainError, Entity, TransactionId};

use crate::entry::AccountEntry;

/// What last wrote a cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdatedRef {
    /// Incremental update from the entry booked for this transaction.
    Transaction(TransactionId),
    /// Full recompute from the ledger aggregate.
    Recompute,
}

impl UpdatedRef {
    /// Stored form of [`UpdatedRef::Recompute`].
    pub const RECOMPUTE_MARKER: &'static str = "cache update";
}

impl core::fmt::Display for UpdatedRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UpdatedRef::Transaction(id) => core::fmt::Display::fmt(id, f),
            UpdatedRef::Recompute => f.write_str(Self::RECOMPUTE_MARKER),
        }
    }
}

impl FromStr for UpdatedRef {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::RECOMPUTE_MARKER {
            return Ok(UpdatedRef::Recompute);
        }
        s.parse().map(UpdatedRef::Transaction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCache {
    pub acc_number: AccountNumber,
    /// Signed running total: credits minus debits.
    pub balance_amount: Decimal,
    pub update_time: DateTime<Utc>,
    pub updated_ref: UpdatedRef,
}

impl BalanceCache {
    /// First row for an account, seeded from a single entry.
    ///
    /// A lone debit yields a negative balance; no ledger validation happens here.
    pub fn seeded(entry: &AccountEntry) -> Self {
        Self {
            acc_number: entry.acc_number,
            balance_amount: entry.signed_amount(),
            update_time: Utc::now(),
            updated_ref: UpdatedRef::Transaction(entry.transaction_id),
        }
    }

    /// The row after applying one more entry incrementally.
    pub fn applied(&self, entry: &AccountEntry) -> Self {
        Self {
            acc_number: self.acc_number,
            balance_amount: self.balance_amount + entry.signed_amount(),
            update_time: Utc::now(),
            updated_ref: UpdatedRef::Transaction(entry.transaction_id),
        }
    }

    /// The row produced by a full ledger recompute.
    pub fn recomputed(acc_number: AccountNumber, total_credit: Decimal, total_debit: Decimal) -> Self {
        Self {
            acc_number,
            balance_amount: total_credit - total_debit,
            update_time: Utc::now(),
            updated_ref: UpdatedRef::Recompute,
        }
    }
}

impl Entity for BalanceCache {
    type Id = AccountNumber;

    fn id(&self) -> Self::Id {
        self.acc_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstructionType;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn entry(kind: InstructionType, amount: Decimal) -> AccountEntry {
        AccountEntry::new(
            AccountNumber::new(42),
            amount,
            Utc::now(),
            TransactionId::new(),
            kind,
            None,
        )
        .unwrap()
    }

    #[test]
    fn lone_debit_seeds_negative_balance() {
        let debit = entry(InstructionType::Debit, dec!(300));
        let row = BalanceCache::seeded(&debit);
        assert_eq!(row.balance_amount, dec!(-300));
        assert_eq!(row.updated_ref, UpdatedRef::Transaction(debit.transaction_id));

        let credit = entry(InstructionType::Credit, dec!(700));
        let row = row.applied(&credit);
        assert_eq!(row.balance_amount, dec!(400));
        assert_eq!(row.updated_ref, UpdatedRef::Transaction(credit.transaction_id));
    }

    #[test]
    fn recompute_is_stamped_with_marker() {
        let row = BalanceCache::recomputed(AccountNumber::new(42), dec!(700), dec!(300));
        assert_eq!(row.balance_amount, dec!(400));
        assert_eq!(row.updated_ref.to_string(), "cache update");
    }

    #[test]
    fn updated_ref_parses_both_forms() {
        assert_eq!("cache update".parse::<UpdatedRef>().unwrap(), UpdatedRef::Recompute);

        let id = TransactionId::new();
        assert_eq!(
            id.to_string().parse::<UpdatedRef>().unwrap(),
            UpdatedRef::Transaction(id)
        );
        assert!("not-a-ref".parse::<UpdatedRef>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: seeding from the first entry and applying the rest yields the
        /// same balance as a recompute over credit and debit totals.
        #[test]
        fn incremental_matches_recompute(
            moves in prop::collection::vec((1i64..1_000_000i64, any::<bool>()), 1..20)
        ) {
            let entries: Vec<AccountEntry> = moves
                .iter()
                .map(|(cents, debit)| {
                    let kind = if *debit { InstructionType::Debit } else { InstructionType::Credit };
                    entry(kind, Decimal::new(*cents, 2))
                })
                .collect();

            let mut row = BalanceCache::seeded(&entries[0]);
            for e in &entries[1..] {
                row = row.applied(e);
            }

            let mut credit = Decimal::ZERO;
            let mut debit = Decimal::ZERO;
            for e in &entries {
                match e.transaction_type {
                    InstructionType::Credit => credit += e.amount,
                    InstructionType::Debit => debit += e.amount,
                }
            }

            let recomputed = BalanceCache::recomputed(AccountNumber::new(42), credit, debit);
            prop_assert_eq!(row.balance_amount, recomputed.balance_amount);
        }
    }
}
