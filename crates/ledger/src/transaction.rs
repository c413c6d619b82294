//! Transaction lifecycle aggregate.
//!
//! One `Transaction` tracks one instruction from submission to its terminal
//! state:
//!
//! ```text
//! NEW ──► COMPLETED
//!  │
//!  ├───► FAILED
//!  │
//!  └───► ERROR
//! ```
//!
//! `UNKNOWN` is only ever reported for an id that does not exist; no transition
//! leads to it.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountNumber, DomainError, DomainResult, Entity, TransactionId};

use crate::entry::AccountEntry;
use crate::instruction::{InstructionDto, InstructionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    New,
    Completed,
    Failed,
    Error,
    Unknown,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::New => "NEW",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Error => "ERROR",
            TransactionStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Error
        )
    }
}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(TransactionStatus::New),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            "ERROR" => Ok(TransactionStatus::Error),
            "UNKNOWN" => Ok(TransactionStatus::Unknown),
            other => Err(DomainError::validation(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// Every persisted field of a [`Transaction`], used to rehydrate one from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParts {
    pub transaction_id: TransactionId,
    pub instruction_type: InstructionType,
    pub acc_number: AccountNumber,
    pub amount: Decimal,
    pub description: Option<String>,
    pub parent_transaction_id: Option<TransactionId>,
    pub initiate_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub error_message: String,
}

/// Lifecycle aggregate for one instruction. Equality is by `transaction_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    transaction_id: TransactionId,
    instruction_type: InstructionType,
    acc_number: AccountNumber,
    amount: Decimal,
    description: Option<String>,
    parent_transaction_id: Option<TransactionId>,
    initiate_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: TransactionStatus,
    error_message: String,
}

impl Transaction {
    /// Start a transaction for a validated instruction.
    pub fn from_instruction(instruction: &InstructionDto) -> DomainResult<Self> {
        instruction.validate()?;
        Ok(Self {
            transaction_id: TransactionId::new(),
            instruction_type: instruction.instruction_type,
            acc_number: instruction.acc_number,
            amount: instruction.amount,
            description: instruction.description.clone(),
            parent_transaction_id: None,
            initiate_time: Utc::now(),
            end_time: None,
            status: TransactionStatus::New,
            error_message: String::new(),
        })
    }

    /// Start the transaction that reverses `parent`.
    pub fn compensating(parent: &Transaction) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            instruction_type: parent.instruction_type.opposite(),
            acc_number: parent.acc_number,
            amount: parent.amount,
            description: Some(format!("Compensating transaction for {}", parent.transaction_id)),
            parent_transaction_id: Some(parent.transaction_id),
            initiate_time: Utc::now(),
            end_time: None,
            status: TransactionStatus::New,
            error_message: String::new(),
        }
    }

    pub fn rehydrate(parts: TransactionParts) -> Self {
        Self {
            transaction_id: parts.transaction_id,
            instruction_type: parts.instruction_type,
            acc_number: parts.acc_number,
            amount: parts.amount,
            description: parts.description,
            parent_transaction_id: parts.parent_transaction_id,
            initiate_time: parts.initiate_time,
            end_time: parts.end_time,
            status: parts.status,
            error_message: parts.error_message,
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn instruction_type(&self) -> InstructionType {
        self.instruction_type
    }

    pub fn acc_number(&self) -> AccountNumber {
        self.acc_number
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parent_transaction_id(&self) -> Option<TransactionId> {
        self.parent_transaction_id
    }

    pub fn initiate_time(&self) -> DateTime<Utc> {
        self.initiate_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// The ledger entry this transaction books.
    pub fn to_entry(&self) -> DomainResult<AccountEntry> {
        AccountEntry::new(
            self.acc_number,
            self.amount,
            self.initiate_time,
            self.transaction_id,
            self.instruction_type,
            self.description.clone(),
        )
    }

    pub fn complete(&mut self) -> DomainResult<()> {
        self.finish(TransactionStatus::Completed, String::new())
    }

    /// The instruction was rejected or could not be applied; nothing was booked.
    pub fn fail(&mut self, message: impl Into<String>) -> DomainResult<()> {
        self.finish(TransactionStatus::Failed, message.into())
    }

    /// Infrastructure failure while applying the instruction.
    pub fn error(&mut self, message: impl Into<String>) -> DomainResult<()> {
        self.finish(TransactionStatus::Error, message.into())
    }

    fn finish(&mut self, to: TransactionStatus, message: String) -> DomainResult<()> {
        if self.status != TransactionStatus::New {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        self.status = to;
        self.error_message = message;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn status_dto(&self) -> TransactionStatusDto {
        TransactionStatusDto {
            transaction_id: self.transaction_id,
            status: self.status,
            error_message: self.error_message.clone(),
            end_time: self.end_time,
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.transaction_id == other.transaction_id
    }
}

impl Eq for Transaction {}

impl Entity for Transaction {
    type Id = TransactionId;

    fn id(&self) -> Self::Id {
        self.transaction_id
    }
}

/// Externally visible status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatusDto {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub error_message: String,
    pub end_time: Option<DateTime<Utc>>,
}

impl TransactionStatusDto {
    /// Sentinel for an id with no recorded transaction.
    pub fn unknown(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            status: TransactionStatus::Unknown,
            error_message: "transaction not found".to_string(),
            end_time: None,
        }
    }
}
