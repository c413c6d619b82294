//! Persistence boundary for the ledger, the balance cache and transaction records.
//!
//! The balance engine only talks to these traits; in-memory implementations back
//! tests/dev, `PostgresStore` backs durable deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{
    InMemoryCacheStore, InMemoryEntityStore, InMemoryLedgerStore, InMemoryTransactionStore,
};
pub use postgres::PostgresStore;
pub use r#trait::{CacheStore, LedgerStore, StoreError, TransactionStore};
