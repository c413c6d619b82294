//! Infrastructure layer: ledger/cache/transaction stores, table schemas, the
//! named lock manager and configuration loading.

pub mod config;
pub mod lock;
pub mod schema;
pub mod store;
