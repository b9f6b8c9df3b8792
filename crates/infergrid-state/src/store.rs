//! StateStore — redb-backed state persistence for InferGrid.
//!
//! Provides typed operations over registered services, budgets, cost
//! records, and daily cost statistics. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Every table maps string keys to JSON bytes.
type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(BUDGETS).map_err(map_err!(Table))?;
        txn.open_table(COST_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(COST_STATISTICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(
        &self,
        def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn delete(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a registered instance.
    pub fn put_service(&self, service: &ServiceInstance) -> StateResult<()> {
        self.put(SERVICES, &service.id, service)?;
        debug!(service_id = %service.id, health = service.health.as_str(), "service stored");
        Ok(())
    }

    pub fn get_service(&self, service_id: &str) -> StateResult<Option<ServiceInstance>> {
        self.get(SERVICES, service_id)
    }

    pub fn list_services(&self) -> StateResult<Vec<ServiceInstance>> {
        self.list(SERVICES)
    }

    /// Delete a registered instance. Returns true if it existed.
    pub fn delete_service(&self, service_id: &str) -> StateResult<bool> {
        self.delete(SERVICES, service_id)
    }

    // ── Budgets ────────────────────────────────────────────────────

    pub fn put_budget(&self, budget: &Budget) -> StateResult<()> {
        self.put(BUDGETS, &budget.id, budget)?;
        debug!(budget_id = %budget.id, scope = %budget.scope_id(), "budget stored");
        Ok(())
    }

    pub fn get_budget(&self, budget_id: &str) -> StateResult<Option<Budget>> {
        self.get(BUDGETS, budget_id)
    }

    pub fn list_budgets(&self) -> StateResult<Vec<Budget>> {
        self.list(BUDGETS)
    }

    // ── Cost records ───────────────────────────────────────────────

    /// Append a cost record.
    pub fn put_cost_record(&self, record: &CostRecord) -> StateResult<()> {
        self.put(COST_RECORDS, &record.table_key(), record)
    }

    /// Most recent cost records, newest first.
    pub fn list_cost_records(&self, limit: usize) -> StateResult<Vec<CostRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COST_RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: CostRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Cost statistics ────────────────────────────────────────────

    /// Add `amount` and `requests` to the `(date, scope)` row, creating it
    /// if absent. Read and write happen in one write transaction.
    pub fn add_cost_statistic(
        &self,
        date: &str,
        scope: &str,
        amount: f64,
        requests: u64,
        now: u64,
    ) -> StateResult<CostStatistic> {
        let key = statistic_key(date, scope);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(COST_STATISTICS).map_err(map_err!(Table))?;
            let existing: Option<CostStatistic> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            let mut stat = existing.unwrap_or_else(|| CostStatistic {
                date: date.to_string(),
                scope: scope.to_string(),
                amount: 0.0,
                request_count: 0,
                updated_at: now,
            });
            stat.amount += amount;
            stat.request_count += requests;
            stat.updated_at = now;

            let value = serde_json::to_vec(&stat).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            updated = stat;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, amount = updated.amount, "cost statistic updated");
        Ok(updated)
    }

    pub fn get_cost_statistic(&self, date: &str, scope: &str) -> StateResult<Option<CostStatistic>> {
        self.get(COST_STATISTICS, &statistic_key(date, scope))
    }

    /// All scopes recorded for one day.
    pub fn list_cost_statistics_for_date(&self, date: &str) -> StateResult<Vec<CostStatistic>> {
        let prefix = format!("{date}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COST_STATISTICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let stat: CostStatistic =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(stat);
            }
        }
        Ok(results)
    }

    /// Total spend for `scope` on days `>= since_date` (`YYYY-MM-DD`).
    pub fn sum_cost_statistics(&self, scope: &str, since_date: &str) -> StateResult<f64> {
        let mut total = 0.0;
        for stat in self.list::<CostStatistic>(COST_STATISTICS)? {
            if stat.scope == scope && stat.date.as_str() >= since_date {
                total += stat.amount;
            }
        }
        Ok(total)
    }
}
