use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountNumber, DomainError, DomainResult, Entity, TransactionId};

use crate::instruction::InstructionType;

const COMPENSATING_NOTE: &str = "Compensating transaction";

/// Identity of a ledger entry.
///
/// A reversal books a second entry for the same transaction with the opposite
/// type, so the transaction id alone is not unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub transaction_id: TransactionId,
    pub transaction_type: InstructionType,
}

/// Immutable ledger record (append-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub acc_number: AccountNumber,
    /// Non-negative magnitude; the direction lives in `transaction_type`.
    pub amount: Decimal,
    pub transaction_time: DateTime<Utc>,
    pub transaction_id: TransactionId,
    pub transaction_type: InstructionType,
    pub description: Option<String>,
}

impl AccountEntry {
    pub fn new(
        acc_number: AccountNumber,
        amount: Decimal,
        transaction_time: DateTime<Utc>,
        transaction_id: TransactionId,
        transaction_type: InstructionType,
        description: Option<String>,
    ) -> DomainResult<Self> {
        if amount < Decimal::ZERO {
            return Err(DomainError::validation("entry amount must not be negative"));
        }
        Ok(Self {
            acc_number,
            amount,
            transaction_time,
            transaction_id,
            transaction_type,
            description,
        })
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            transaction_id: self.transaction_id,
            transaction_type: self.transaction_type,
        }
    }

    /// Contribution of this entry to the account balance.
    pub fn signed_amount(&self) -> Decimal {
        self.transaction_type.signed(self.amount)
    }

    /// Derive the booked reversal of this entry: same transaction and amount,
    /// opposite type, fresh timestamp, annotated description.
    pub fn compensating_entry(&self) -> AccountEntry {
        let description = match &self.description {
            Some(d) if !d.is_empty() => format!("{d} - {COMPENSATING_NOTE}"),
            _ => COMPENSATING_NOTE.to_string(),
        };

        AccountEntry {
            acc_number: self.acc_number,
            amount: self.amount,
            transaction_time: Utc::now(),
            transaction_id: self.transaction_id,
            transaction_type: self.transaction_type.opposite(),
            description: Some(description),
        }
    }
}

impl Entity for AccountEntry {
    type Id = EntryKey;

    fn id(&self) -> Self::Id {
        self.key()
    }
}
