use std::time::Duration;

use tracing::{debug, warn};

use super::{LockError, LockManager};

/// A held named lock. Dropping the guard releases the name.
///
/// Because release runs from `Drop`, it happens on every exit path of the scope
/// that owns the guard, including early returns through `?` and unwinding panics.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a, M: LockManager + ?Sized> {
    manager: &'a M,
    name: String,
    armed: bool,
}

impl<'a, M: LockManager + ?Sized> LockGuard<'a, M> {
    pub fn acquire(manager: &'a M, name: &str, timeout: Duration) -> Result<Self, LockError> {
        manager.acquire(name, timeout)?;
        debug!(lock = name, "lock acquired");
        Ok(Self {
            manager,
            name: name.to_string(),
            armed: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release now and report the outcome instead of logging it.
    pub fn release(mut self) -> Result<(), LockError> {
        self.armed = false;
        let result = self.manager.release(&self.name);
        if result.is_ok() {
            debug!(lock = %self.name, "lock released");
        }
        result
    }
}

impl<M: LockManager + ?Sized> Drop for LockGuard<'_, M> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.manager.release(&self.name) {
            Ok(()) => debug!(lock = %self.name, "lock released"),
            Err(err) => warn!(lock = %self.name, error = %err, "lock release failed"),
        }
    }
}

impl<M: LockManager + ?Sized> core::fmt::Debug for LockGuard<'_, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("armed", &self.armed)
            .finish()
    }
}
