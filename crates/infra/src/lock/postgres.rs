//! Named locks shared between processes through Postgres advisory locks.
//!
//! A lock name is hashed to a 64-bit advisory key with `hashtextextended`. An
//! advisory lock belongs to the session that took it, so every held name keeps
//! its own pooled connection checked out until release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::{LockError, LockManager};

const TRY_LOCK_SQL: &str = "SELECT pg_try_advisory_lock(hashtextextended($1, 0))";
const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock(hashtextextended($1, 0))";

/// Pause between attempts on a contended name.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

pub struct PostgresLockManager {
    pool: PgPool,
    runtime: Arc<Runtime>,
    sessions: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl core::fmt::Debug for PostgresLockManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresLockManager").finish_non_exhaustive()
    }
}

fn unavailable(err: impl core::fmt::Display) -> LockError {
    LockError::Unavailable(err.to_string())
}

impl PostgresLockManager {
    pub(crate) fn new(pool: PgPool, runtime: Arc<Runtime>) -> Self {
        Self {
            pool,
            runtime,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn try_lock(
        &self,
        name: &str,
        deadline: Instant,
    ) -> Result<Option<PoolConnection<Postgres>>, LockError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut conn = match tokio::time::timeout(remaining, self.pool.acquire()).await {
            Ok(conn) => conn.map_err(unavailable)?,
            Err(_) => return Ok(None),
        };

        let granted: bool = sqlx::query_scalar(TRY_LOCK_SQL)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(unavailable)?;

        Ok(granted.then_some(conn))
    }

    async fn lock_until(
        &self,
        name: &str,
        started: Instant,
        deadline: Instant,
    ) -> Result<PoolConnection<Postgres>, LockError> {
        loop {
            if let Some(conn) = self.try_lock(name, deadline).await? {
                return Ok(conn);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::Timeout {
                    name: name.to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(remaining.min(RETRY_INTERVAL)).await;
        }
    }
}

impl LockManager for PostgresLockManager {
    fn acquire(&self, name: &str, timeout: Duration) -> Result<(), LockError> {
        let started = Instant::now();
        let deadline = started + timeout;

        let conn = self
            .runtime
            .block_on(self.lock_until(name, started, deadline))?;

        debug!(lock = name, "advisory lock granted");
        match self.sessions.lock() {
            Ok(mut sessions) => {
                sessions.insert(name.to_string(), conn);
                Ok(())
            }
            Err(_) => {
                // Closing the session drops the advisory lock it was just granted.
                warn!(lock = name, "session table poisoned; closing granted session");
                let _ = self.runtime.block_on(conn.close());
                Err(unavailable("session table poisoned"))
            }
        }
    }

    fn release(&self, name: &str) -> Result<(), LockError> {
        let conn = self
            .sessions
            .lock()
            .map_err(|_| unavailable("session table poisoned"))?
            .remove(name)
            .ok_or_else(|| LockError::NotHeld(name.to_string()))?;

        self.runtime.block_on(async move {
            let mut conn = conn;
            let unlocked: Result<bool, sqlx::Error> = sqlx::query_scalar(UNLOCK_SQL)
                .bind(name)
                .fetch_one(&mut *conn)
                .await;

            match unlocked {
                Ok(true) => Ok(()),
                Ok(false) => Err(LockError::NotHeld(name.to_string())),
                Err(err) => {
                    // Closing the session drops every advisory lock it still holds.
                    warn!(lock = name, error = %err, "advisory unlock failed; closing session");
                    let _ = conn.close().await;
                    Err(unavailable(err))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BalanceConfig;
    use crate::store::PostgresStore;

    fn store() -> PostgresStore {
        let config = BalanceConfig::from_env().unwrap();
        PostgresStore::connect(config.require_database_url().unwrap(), 4).unwrap()
    }

    #[test]
    #[ignore = "needs DATABASE_URL pointing at a Postgres instance"]
    fn names_exclude_across_pools() {
        let first = store().lock_manager();
        let second = store().lock_manager();

        first.acquire("pg_lock_shared", Duration::from_secs(2)).unwrap();
        let err = second
            .acquire("pg_lock_shared", Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        first.release("pg_lock_shared").unwrap();
        second.acquire("pg_lock_shared", Duration::from_secs(2)).unwrap();
        second.release("pg_lock_shared").unwrap();
        assert_eq!(
            second.release("pg_lock_shared"),
            Err(LockError::NotHeld("pg_lock_shared".to_string()))
        );
    }

    #[test]
    #[ignore = "needs DATABASE_URL pointing at a Postgres instance"]
    fn grant_is_dropped_when_session_table_is_poisoned() {
        let poisoned = store().lock_manager();
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _sessions = poisoned.sessions.lock().unwrap();
                    panic!("poison the session table");
                })
                .join()
        });

        let err = poisoned
            .acquire("pg_lock_poisoned", Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, LockError::Unavailable(_)));

        // A separate pool gets the name, so the granted session did not survive.
        let other = store().lock_manager();
        other
            .acquire("pg_lock_poisoned", Duration::from_secs(2))
            .unwrap();
        other.release("pg_lock_poisoned").unwrap();
    }
}
