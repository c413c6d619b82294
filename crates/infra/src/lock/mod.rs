//! Named mutual exclusion.
//!
//! A lock is identified by an arbitrary string. Holding a name excludes every other
//! caller that asks for the same name, whichever thread (or, for a shared backend,
//! process) it runs on. Acquisition waits at most the caller's timeout.

pub mod guard;
pub mod in_memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use guard::LockGuard;
pub use in_memory::InMemoryLockManager;
pub use postgres::PostgresLockManager;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// The name was still held when the timeout elapsed. Nothing was acquired.
    #[error("timed out after {waited:?} waiting for lock '{name}'")]
    Timeout { name: String, waited: Duration },

    /// Release of a name that is not currently held.
    #[error("lock '{0}' is not held")]
    NotHeld(String),

    /// Lock manager state is unusable (e.g. poisoned by a panicking holder).
    #[error("lock manager unavailable: {0}")]
    Unavailable(String),
}

pub trait LockManager: Send + Sync {
    /// Block until `name` is granted or `timeout` elapses.
    fn acquire(&self, name: &str, timeout: Duration) -> Result<(), LockError>;

    /// Give `name` back. Releasing a name nobody holds is [`LockError::NotHeld`].
    fn release(&self, name: &str) -> Result<(), LockError>;

    /// Acquire `name` and return a guard that releases it when dropped.
    fn acquire_scoped(&self, name: &str, timeout: Duration) -> Result<LockGuard<'_, Self>, LockError>
    where
        Self: Sized,
    {
        LockGuard::acquire(self, name, timeout)
    }
}

impl<M> LockManager for Arc<M>
where
    M: LockManager + ?Sized,
{
    fn acquire(&self, name: &str, timeout: Duration) -> Result<(), LockError> {
        (**self).acquire(name, timeout)
    }

    fn release(&self, name: &str) -> Result<(), LockError> {
        (**self).release(name)
    }
}
