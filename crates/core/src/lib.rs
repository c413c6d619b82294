//! `tally-core`: domain primitives shared by the ledger, the stores and the
//! balance engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AccountNumber, TransactionId};
