use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{LockError, LockManager};

/// Process-local named lock manager.
///
/// Held names live in one mutex-protected set; waiters park on a condvar and are
/// woken on every release. A wake-up for another name just sends the waiter back
/// to sleep for whatever is left of its own timeout.
#[derive(Debug, Default)]
pub struct InMemoryLockManager {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(name))
            .unwrap_or(false)
    }
}

fn poisoned() -> LockError {
    LockError::Unavailable("lock poisoned".to_string())
}

impl LockManager for InMemoryLockManager {
    fn acquire(&self, name: &str, timeout: Duration) -> Result<(), LockError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut held = self.held.lock().map_err(|_| poisoned())?;

        loop {
            if !held.contains(name) {
                held.insert(name.to_string());
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::Timeout {
                    name: name.to_string(),
                    waited: started.elapsed(),
                });
            }

            let (guard, _) = self
                .released
                .wait_timeout(held, remaining)
                .map_err(|_| poisoned())?;
            held = guard;
        }
    }

    fn release(&self, name: &str) -> Result<(), LockError> {
        let mut held = self.held.lock().map_err(|_| poisoned())?;
        if !held.remove(name) {
            return Err(LockError::NotHeld(name.to_string()));
        }
        drop(held);
        self.released.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn acquire_then_release() {
        let locks = InMemoryLockManager::new();
        locks.acquire("42_UPDATE_BALANCE_LOCK", SHORT).unwrap();
        assert!(locks.is_held("42_UPDATE_BALANCE_LOCK"));
        locks.release("42_UPDATE_BALANCE_LOCK").unwrap();
        assert!(!locks.is_held("42_UPDATE_BALANCE_LOCK"));
    }

    #[test]
    fn second_acquire_times_out() {
        let locks = InMemoryLockManager::new();
        locks.acquire("a", SHORT).unwrap();

        let err = locks.acquire("a", SHORT).unwrap_err();
        match err {
            LockError::Timeout { name, waited } => {
                assert_eq!(name, "a");
                assert!(waited >= SHORT);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn distinct_names_do_not_contend() {
        let locks = InMemoryLockManager::new();
        locks.acquire("1_UPDATE_BALANCE_LOCK", SHORT).unwrap();
        locks
            .acquire("2_UPDATE_BALANCE_LOCK", Duration::ZERO)
            .unwrap();
    }

    #[test]
    fn releasing_unheld_name_is_an_error() {
        let locks = InMemoryLockManager::new();
        assert_eq!(
            locks.release("nobody"),
            Err(LockError::NotHeld("nobody".to_string()))
        );
    }

    #[test]
    fn waiter_is_granted_after_release() {
        let locks = Arc::new(InMemoryLockManager::new());
        locks.acquire("shared", SHORT).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || {
                let res = locks.acquire("shared", Duration::from_secs(5));
                tx.send(()).unwrap();
                res
            })
        };

        // Still blocked while the name is held.
        assert!(rx.recv_timeout(SHORT).is_err());

        locks.release("shared").unwrap();
        waiter.join().unwrap().unwrap();
        assert!(locks.is_held("shared"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = InMemoryLockManager::new();
        {
            let guard = locks.acquire_scoped("scoped", SHORT).unwrap();
            assert_eq!(guard.name(), "scoped");
            assert!(locks.is_held("scoped"));
        }
        assert!(!locks.is_held("scoped"));
    }

    #[test]
    fn guard_releases_when_scope_fails() {
        fn failing_step(locks: &InMemoryLockManager) -> Result<(), String> {
            let _guard = locks.acquire_scoped("scoped", SHORT).map_err(|e| e.to_string())?;
            Err("apply failed".to_string())
        }

        let locks = InMemoryLockManager::new();
        assert!(failing_step(&locks).is_err());
        assert!(!locks.is_held("scoped"));
    }

    #[test]
    fn explicit_release_reports_outcome() {
        let locks = InMemoryLockManager::new();
        let guard = locks.acquire_scoped("explicit", SHORT).unwrap();
        guard.release().unwrap();
        assert!(!locks.is_held("explicit"));
    }
}
