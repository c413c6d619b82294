//! Balance Consistency Engine.
//!
//! Keeps the per-account `BalanceCache` consistent with the append-only ledger
//! under concurrent writers. Every mutation of an account's cache row, and every
//! append to its ledger, happens while holding that account's named lock(s).
//!
//! - [`BalanceEngine`]: lock-free reads, incremental updates, full recomputes and
//!   the two-lock append path.
//! - [`PostingService`]: transaction lifecycle on top of the engine (post,
//!   reverse, local transfer, status).

pub mod engine;
pub mod error;
pub mod posting;

pub use engine::{AccountEntryLock, BalanceEngine, entry_lock_name, update_lock_name};
pub use error::BalanceError;
pub use posting::{PostingService, TransferOutcome};
