//! Ledger data model: instructions, transactions, append-only account entries
//! and the materialized balance cache.
//!
//! Pure domain logic only: no IO, no locking, no persistence concerns.

pub mod cache;
pub mod entry;
pub mod instruction;
pub mod transaction;

pub use cache::{BalanceCache, UpdatedRef};
pub use entry::{AccountEntry, EntryKey};
pub use instruction::{InstructionDto, InstructionType, LocalTransferInstructionDto};
pub use transaction::{Transaction, TransactionParts, TransactionStatus, TransactionStatusDto};
