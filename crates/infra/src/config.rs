//! Configuration loading and representation.
//!
//! Everything is read from the environment; unset variables fall back to the
//! defaults below, malformed ones are reported.

use std::time::Duration;

use thiserror::Error;

pub const UPDATE_LOCK_TIMEOUT_VAR: &str = "TALLY_UPDATE_LOCK_TIMEOUT_MS";
pub const ENTRY_LOCK_TIMEOUT_VAR: &str = "TALLY_ENTRY_LOCK_TIMEOUT_MS";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS_VAR: &str = "TALLY_DB_MAX_CONNECTIONS";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Bounded waits for the two per-account locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeouts {
    /// Balance-update lock (always taken first).
    pub update_balance: Duration,
    /// Entry-append lock (taken second, only on the append path).
    pub entry_append: Duration,
}

impl Default for LockTimeouts {
    fn default() -> Self {
        Self {
            update_balance: Duration::from_millis(5000),
            entry_append: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceConfig {
    pub lock_timeouts: LockTimeouts,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            lock_timeouts: LockTimeouts::default(),
            database_url: None,
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl BalanceConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let update_balance = millis(&lookup, UPDATE_LOCK_TIMEOUT_VAR)?
            .unwrap_or(defaults.lock_timeouts.update_balance);
        let entry_append = millis(&lookup, ENTRY_LOCK_TIMEOUT_VAR)?
            .unwrap_or(defaults.lock_timeouts.entry_append);

        let db_max_connections = match lookup(DB_MAX_CONNECTIONS_VAR) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| ConfigError::InvalidNumber {
                var: DB_MAX_CONNECTIONS_VAR,
                value: raw,
            })?,
            None => defaults.db_max_connections,
        };

        Ok(Self {
            lock_timeouts: LockTimeouts {
                update_balance,
                entry_append,
            },
            database_url: lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty()),
            db_max_connections,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL_VAR))
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        None => Ok(None),
    }
}
