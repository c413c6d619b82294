use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;

use tally_core::{AccountNumber, Entity, TransactionId};
use tally_ledger::{AccountEntry, BalanceCache, EntryKey, InstructionType, Transaction};

use super::r#trait::{CacheStore, LedgerStore, StoreError, TransactionStore};

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<AccountNumber, Vec<AccountEntry>>,
    /// Entry identity -> (account, position in that account's stream).
    index: HashMap<EntryKey, (AccountNumber, usize)>,
}

/// In-memory append-only ledger.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(&self, entry: &AccountEntry) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let key = entry.key();
        if state.index.contains_key(&key) {
            return Err(StoreError::Constraint(format!(
                "entry {} {} already booked",
                key.transaction_id, key.transaction_type
            )));
        }

        let stream = state.accounts.entry(entry.acc_number).or_default();
        stream.push(entry.clone());
        let position = stream.len() - 1;
        state.index.insert(key, (entry.acc_number, position));
        Ok(())
    }

    fn sum_amount(
        &self,
        acc_number: AccountNumber,
        transaction_type: InstructionType,
    ) -> Result<Decimal, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .accounts
            .get(&acc_number)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.transaction_type == transaction_type)
                    .map(|e| e.amount)
                    .sum()
            })
            .unwrap_or(Decimal::ZERO))
    }

    fn find(&self, key: &EntryKey) -> Result<Option<AccountEntry>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.index.get(key).and_then(|(acc, position)| {
            state
                .accounts
                .get(acc)
                .and_then(|entries| entries.get(*position))
                .cloned()
        }))
    }

    fn entries(&self, acc_number: AccountNumber) -> Result<Vec<AccountEntry>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.accounts.get(&acc_number).cloned().unwrap_or_default())
    }
}

/// In-memory keyed record store (one row per entity id) for tests/dev.
///
/// Backs both the balance cache (`BalanceCache`, keyed by account) and the
/// transaction log (`Transaction`, keyed by transaction id).
#[derive(Debug)]
pub struct InMemoryEntityStore<T: Entity> {
    rows: RwLock<HashMap<T::Id, T>>,
}

impl<T: Entity> InMemoryEntityStore<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Entity> Default for InMemoryEntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryEntityStore<T>
where
    T: Entity + Clone,
{
    fn get_row(&self, id: &T::Id) -> Result<Option<T>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(id).cloned())
    }

    fn put_row(&self, row: &T) -> Result<Option<T>, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        Ok(rows.insert(row.id(), row.clone()))
    }
}

/// In-memory balance cache.
pub type InMemoryCacheStore = InMemoryEntityStore<BalanceCache>;

/// In-memory transaction log.
pub type InMemoryTransactionStore = InMemoryEntityStore<Transaction>;

impl CacheStore for InMemoryEntityStore<BalanceCache> {
    fn get(&self, acc_number: AccountNumber) -> Result<Option<BalanceCache>, StoreError> {
        self.get_row(&acc_number)
    }

    fn upsert(&self, row: &BalanceCache) -> Result<(), StoreError> {
        self.put_row(row).map(|_| ())
    }
}

impl TransactionStore for InMemoryEntityStore<Transaction> {
    fn save(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if rows.contains_key(&tx.transaction_id()) {
            return Err(StoreError::Constraint(format!(
                "transaction {} already exists",
                tx.transaction_id()
            )));
        }
        rows.insert(tx.transaction_id(), tx.clone());
        Ok(())
    }

    fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        self.get_row(&transaction_id)
    }

    fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        match rows.get_mut(&tx.transaction_id()) {
            Some(existing) => {
                *existing = tx.clone();
                Ok(())
            }
            None => Err(StoreError::Constraint(format!(
                "transaction {} does not exist",
                tx.transaction_id()
            ))),
        }
    }
}
