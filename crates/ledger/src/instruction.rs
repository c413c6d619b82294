use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountNumber, DomainError, DomainResult};

/// Direction of a movement on one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstructionType {
    Debit,
    Credit,
}

impl InstructionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InstructionType::Debit => "DEBIT",
            InstructionType::Credit => "CREDIT",
        }
    }

    /// The type a reversal of this movement is booked with.
    pub fn opposite(self) -> Self {
        match self {
            InstructionType::Debit => InstructionType::Credit,
            InstructionType::Credit => InstructionType::Debit,
        }
    }

    /// Apply this movement's sign to a non-negative magnitude.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            InstructionType::Debit => -amount,
            InstructionType::Credit => amount,
        }
    }
}

impl core::fmt::Display for InstructionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(InstructionType::Debit),
            "CREDIT" => Ok(InstructionType::Credit),
            other => Err(DomainError::validation(format!(
                "unknown instruction type '{other}'"
            ))),
        }
    }
}

fn ensure_positive(amount: Decimal) -> DomainResult<()> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation("amount must be positive"));
    }
    Ok(())
}

/// Unvalidated intent to move funds on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionDto {
    pub acc_number: AccountNumber,
    pub amount: Decimal,
    pub instruction_type: InstructionType,
    pub description: Option<String>,
}

impl InstructionDto {
    pub fn new(
        acc_number: AccountNumber,
        amount: Decimal,
        instruction_type: InstructionType,
        description: Option<String>,
    ) -> Self {
        Self {
            acc_number,
            amount,
            instruction_type,
            description,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        ensure_positive(self.amount)
    }
}

/// Transfer between two accounts held by the same ledger.
///
/// It is executed as two single-account instructions; see
/// [`to_debit_instruction`](Self::to_debit_instruction) and
/// [`to_credit_instruction`](Self::to_credit_instruction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTransferInstructionDto {
    pub from_acc_number: AccountNumber,
    pub to_acc_number: AccountNumber,
    pub amount: Decimal,
    pub description: Option<String>,
}

impl LocalTransferInstructionDto {
    pub fn validate(&self) -> DomainResult<()> {
        ensure_positive(self.amount)?;
        if self.from_acc_number == self.to_acc_number {
            return Err(DomainError::validation(
                "transfer source and destination must differ",
            ));
        }
        Ok(())
    }

    pub fn to_debit_instruction(&self) -> InstructionDto {
        InstructionDto::new(
            self.from_acc_number,
            self.amount,
            InstructionType::Debit,
            self.description.clone(),
        )
    }

    pub fn to_credit_instruction(&self) -> InstructionDto {
        InstructionDto::new(
            self.to_acc_number,
            self.amount,
            InstructionType::Credit,
            self.description.clone(),
        )
    }
}
