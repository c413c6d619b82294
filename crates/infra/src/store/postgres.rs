//! Postgres-backed stores.
//!
//! One `PostgresStore` implements [`LedgerStore`], [`CacheStore`] and
//! [`TransactionStore`] over a shared connection pool. The store traits are
//! synchronous, so the store owns a small tokio runtime and drives every query to
//! completion on it.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Constraint` |
//! | Database (other) | Any other | `Unavailable` |
//! | Decode / ColumnDecode / ColumnNotFound | N/A | `Decode` |
//! | PoolClosed, PoolTimedOut, Io, Tls, other | N/A | `Unavailable` |
//!
//! ## Thread Safety
//!
//! `PostgresStore` is `Send + Sync`. Calls must not be made from inside an async
//! context: the store blocks the calling thread on its own runtime.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tokio::runtime::Runtime;
use tracing::{debug, instrument};
use uuid::Uuid;

use tally_core::{AccountNumber, TransactionId};
use tally_ledger::{
    AccountEntry, BalanceCache, EntryKey, InstructionType, Transaction, TransactionParts,
};

use super::r#trait::{CacheStore, LedgerStore, StoreError, TransactionStore};
use crate::lock::PostgresLockManager;
use crate::schema::{self, TableSchema};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl core::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

impl PostgresStore {
    /// Build the runtime and connect a pool of at most `max_connections`.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tally-pg")
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Named locks backed by advisory locks on this store's database, sharing its
    /// pool and runtime.
    pub fn lock_manager(&self) -> PostgresLockManager {
        PostgresLockManager::new(self.pool.clone(), self.runtime.clone())
    }

    /// Create every table and index the stores use (idempotent).
    #[instrument(skip(self), err)]
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            for table in schema::ALL {
                for statement in table.ddl() {
                    debug!(table = table.table, "applying ddl");
                    sqlx::query(&statement)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
                }
            }
            Ok::<(), StoreError>(())
        })
    }
}

fn insert_sql(table: &TableSchema) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.table,
        table.column_list(),
        table.placeholders()
    )
}

fn select_sql(table: &TableSchema, filter: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}",
        table.column_list(),
        table.table,
        filter
    )
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") | Some("23503") | Some("23514") => {
                StoreError::Constraint(format!("{operation}: {err}"))
            }
            _ => StoreError::Unavailable(format!("{operation}: {err}")),
        },
        sqlx::Error::Decode(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Decode(format!("{operation}: {err}")),
        _ => StoreError::Unavailable(format!("{operation}: {err}")),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(name)
        .map_err(|e| map_sqlx_error("decode", e))
}

fn entry_from_row(row: &PgRow) -> Result<AccountEntry, StoreError> {
    let transaction_type: String = column(row, "transaction_type")?;
    Ok(AccountEntry {
        acc_number: AccountNumber::new(column(row, "acc_number")?),
        amount: column(row, "amount")?,
        transaction_time: column(row, "transaction_time")?,
        transaction_id: TransactionId::from_uuid(column(row, "transaction_id")?),
        transaction_type: transaction_type
            .parse()
            .map_err(|e| StoreError::Decode(format!("transaction_type: {e}")))?,
        description: column(row, "description")?,
    })
}

fn cache_from_row(row: &PgRow) -> Result<BalanceCache, StoreError> {
    let updated_ref: String = column(row, "updated_ref")?;
    Ok(BalanceCache {
        acc_number: AccountNumber::new(column(row, "acc_number")?),
        balance_amount: column(row, "balance_amount")?,
        update_time: column(row, "update_time")?,
        updated_ref: updated_ref
            .parse()
            .map_err(|e| StoreError::Decode(format!("updated_ref: {e}")))?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let instruction_type: String = column(row, "instruction_type")?;
    let status: String = column(row, "status")?;
    let parent: Option<Uuid> = column(row, "parent_transaction_id")?;
    let end_time: Option<DateTime<Utc>> = column(row, "end_time")?;

    Ok(Transaction::rehydrate(TransactionParts {
        transaction_id: TransactionId::from_uuid(column(row, "transaction_id")?),
        instruction_type: instruction_type
            .parse()
            .map_err(|e| StoreError::Decode(format!("instruction_type: {e}")))?,
        acc_number: AccountNumber::new(column(row, "acc_number")?),
        amount: column(row, "amount")?,
        description: column(row, "description")?,
        parent_transaction_id: parent.map(TransactionId::from_uuid),
        initiate_time: column(row, "initiate_time")?,
        end_time,
        status: status
            .parse()
            .map_err(|e| StoreError::Decode(format!("status: {e}")))?,
        error_message: column(row, "error_message")?,
    }))
}

impl LedgerStore for PostgresStore {
    #[instrument(
        skip(self, entry),
        fields(acc_number = %entry.acc_number, transaction_id = %entry.transaction_id),
        err
    )]
    fn append(&self, entry: &AccountEntry) -> Result<(), StoreError> {
        let sql = insert_sql(&schema::ACCOUNT_ENTRY);
        self.runtime.block_on(async {
            sqlx::query(&sql)
                .bind(entry.acc_number.get())
                .bind(entry.amount)
                .bind(entry.transaction_time)
                .bind(*entry.transaction_id.as_uuid())
                .bind(entry.transaction_type.as_str())
                .bind(entry.description.as_deref())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("append", e))?;
            Ok::<(), StoreError>(())
        })
    }

    fn sum_amount(
        &self,
        acc_number: AccountNumber,
        transaction_type: InstructionType,
    ) -> Result<Decimal, StoreError> {
        let sql = format!(
            "SELECT COALESCE(SUM(amount), 0) FROM {} WHERE acc_number = $1 AND transaction_type = $2",
            schema::ACCOUNT_ENTRY.table
        );
        self.runtime.block_on(async {
            sqlx::query_scalar::<_, Decimal>(&sql)
                .bind(acc_number.get())
                .bind(transaction_type.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("sum_amount", e))
        })
    }

    fn find(&self, key: &EntryKey) -> Result<Option<AccountEntry>, StoreError> {
        let sql = select_sql(
            &schema::ACCOUNT_ENTRY,
            "transaction_id = $1 AND transaction_type = $2",
        );
        self.runtime.block_on(async {
            let row = sqlx::query(&sql)
                .bind(*key.transaction_id.as_uuid())
                .bind(key.transaction_type.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("find", e))?;
            row.as_ref().map(entry_from_row).transpose()
        })
    }

    fn entries(&self, acc_number: AccountNumber) -> Result<Vec<AccountEntry>, StoreError> {
        let sql = select_sql(
            &schema::ACCOUNT_ENTRY,
            "acc_number = $1 ORDER BY transaction_time ASC, transaction_id ASC",
        );
        self.runtime.block_on(async {
            let rows = sqlx::query(&sql)
                .bind(acc_number.get())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("entries", e))?;
            rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()
        })
    }
}

impl CacheStore for PostgresStore {
    fn get(&self, acc_number: AccountNumber) -> Result<Option<BalanceCache>, StoreError> {
        let sql = select_sql(&schema::BALANCE_CACHE, "acc_number = $1");
        self.runtime.block_on(async {
            let row = sqlx::query(&sql)
                .bind(acc_number.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_cache", e))?;
            row.as_ref().map(cache_from_row).transpose()
        })
    }

    #[instrument(skip(self, row), fields(acc_number = %row.acc_number), err)]
    fn upsert(&self, row: &BalanceCache) -> Result<(), StoreError> {
        let sql = format!(
            "{} ON CONFLICT (acc_number) DO UPDATE SET \
             balance_amount = EXCLUDED.balance_amount, \
             update_time = EXCLUDED.update_time, \
             updated_ref = EXCLUDED.updated_ref",
            insert_sql(&schema::BALANCE_CACHE)
        );
        self.runtime.block_on(async {
            sqlx::query(&sql)
                .bind(row.acc_number.get())
                .bind(row.balance_amount)
                .bind(row.update_time)
                .bind(row.updated_ref.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("upsert_cache", e))?;
            Ok::<(), StoreError>(())
        })
    }
}

impl TransactionStore for PostgresStore {
    fn save(&self, tx: &Transaction) -> Result<(), StoreError> {
        let sql = insert_sql(&schema::TRANSACTIONS);
        self.runtime.block_on(async {
            sqlx::query(&sql)
                .bind(*tx.transaction_id().as_uuid())
                .bind(tx.instruction_type().as_str())
                .bind(tx.acc_number().get())
                .bind(tx.amount())
                .bind(tx.description())
                .bind(tx.parent_transaction_id().map(|id| *id.as_uuid()))
                .bind(tx.initiate_time())
                .bind(tx.end_time())
                .bind(tx.status().as_str())
                .bind(tx.error_message())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("save_transaction", e))?;
            Ok::<(), StoreError>(())
        })
    }

    fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let sql = select_sql(&schema::TRANSACTIONS, "transaction_id = $1");
        self.runtime.block_on(async {
            let row = sqlx::query(&sql)
                .bind(*transaction_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_transaction", e))?;
            row.as_ref().map(transaction_from_row).transpose()
        })
    }

    fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET end_time = $2, status = $3, error_message = $4 WHERE transaction_id = $1",
            schema::TRANSACTIONS.table
        );
        self.runtime.block_on(async {
            let result = sqlx::query(&sql)
                .bind(*tx.transaction_id().as_uuid())
                .bind(tx.end_time())
                .bind(tx.status().as_str())
                .bind(tx.error_message())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("update_transaction", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Constraint(format!(
                    "transaction {} does not exist",
                    tx.transaction_id()
                )));
            }
            Ok::<(), StoreError>(())
        })
    }
}
