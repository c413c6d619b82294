//! Verify account balance caches against the ledger and repair drifted rows.
//!
//! Usage: `tally-reconcile <ACC_NUMBER>...`
//!
//! Reads `DATABASE_URL` and the lock timeout variables from the environment.
//! Exits non-zero if any account could not be checked.

use anyhow::{Context, bail};
use tracing::{error, info, warn};

use tally_balance::{BalanceEngine, BalanceError};
use tally_core::AccountNumber;
use tally_infra::config::BalanceConfig;
use tally_infra::store::PostgresStore;

fn main() -> anyhow::Result<()> {
    tally_observability::init();

    let accounts = std::env::args()
        .skip(1)
        .map(|arg| {
            arg.parse::<AccountNumber>()
                .with_context(|| format!("invalid account number '{arg}'"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if accounts.is_empty() {
        bail!("usage: tally-reconcile <ACC_NUMBER>...");
    }

    let config = BalanceConfig::from_env()?;
    let store = PostgresStore::connect(config.require_database_url()?, config.db_max_connections)
        .context("connecting to the balance database")?;
    store.ensure_schema()?;

    let engine = BalanceEngine::new(store.clone(), store.clone(), store.lock_manager())
        .with_timeouts(config.lock_timeouts);

    let mut repaired = 0usize;
    let mut failed = 0usize;
    for acc_number in accounts {
        match engine.check_consistency(acc_number) {
            Ok(balance) => info!(%acc_number, %balance, "balance consistent"),
            Err(BalanceError::ConsistencyDrift { cached, ledger, .. }) => {
                warn!(%acc_number, %cached, %ledger, "repairing drifted balance cache");
                match engine.refresh_cache(acc_number) {
                    Ok(_) => repaired += 1,
                    Err(err) => {
                        error!(%acc_number, error = %err, "repair failed");
                        failed += 1;
                    }
                }
            }
            Err(err) => {
                error!(%acc_number, error = %err, "consistency check failed");
                failed += 1;
            }
        }
    }

    info!(repaired, failed, "reconciliation finished");
    if failed > 0 {
        bail!("{failed} account(s) could not be reconciled");
    }
    Ok(())
}
