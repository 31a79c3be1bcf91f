//! In-memory ledger store.
//!
//! Mirrors the `PostgreSQL` store's semantics (unique `row_order` per system,
//! monotonic sequences, all-or-nothing commits) without a database. Used by
//! tests and by dry runs of the CLI.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{LedgerChanges, LedgerStore, StoreError};
use crate::locks::{SystemLease, SystemLocks};
use crate::models::Selection;

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<Uuid, Selection>,
    sequences: HashMap<String, i64>,
}

impl MemoryState {
    fn check_row_order(&self, selection: &Selection) -> Result<(), StoreError> {
        let taken = self.rows.values().any(|row| {
            row.id != selection.id
                && row.system_id == selection.system_id
                && row.row_order == selection.row_order
        });
        if taken {
            return Err(StoreError::DuplicateRowOrder {
                system_id: selection.system_id.clone(),
                row_order: selection.row_order,
            });
        }
        Ok(())
    }

    fn put(&mut self, selection: Selection) {
        let last = self
            .sequences
            .entry(selection.system_id.clone())
            .or_insert(selection.row_order);
        *last = (*last).max(selection.row_order);
        self.rows.insert(selection.id, selection);
    }

    fn system_rows(&self, system_id: &str) -> Vec<Selection> {
        let mut rows: Vec<Selection> = self
            .rows
            .values()
            .filter(|row| row.system_id == system_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.row_order);
        rows
    }
}

/// Ledger store backed by a process-local map.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<MemoryState>,
    leases: SystemLocks,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a system's ledger, ascending. Synchronous helper for tests and
    /// reporting.
    #[must_use]
    pub fn snapshot(&self, system_id: &str) -> Vec<Selection> {
        self.state.read().system_rows(system_id)
    }

    /// Total number of stored rows across all systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    /// Returns true if the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().rows.is_empty()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn next_row_order(&self, system_id: &str) -> Result<i64, StoreError> {
        let mut state = self.state.write();
        let last = state.sequences.entry(system_id.to_string()).or_insert(0);
        *last += 1;
        Ok(*last)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Selection>, StoreError> {
        Ok(self.state.read().rows.get(&id).cloned())
    }

    async fn find_by_system_ordered_from(
        &self,
        system_id: &str,
        from_row_order: i64,
    ) -> Result<Vec<Selection>, StoreError> {
        let mut rows = self.state.read().system_rows(system_id);
        rows.retain(|row| row.row_order >= from_row_order);
        Ok(rows)
    }

    async fn find_preceding(
        &self,
        system_id: &str,
        row_order: i64,
    ) -> Result<Option<Selection>, StoreError> {
        let state = self.state.read();
        Ok(state
            .rows
            .values()
            .filter(|row| row.system_id == system_id && row.row_order < row_order)
            .max_by_key(|row| row.row_order)
            .cloned())
    }

    async fn find_unresulted(
        &self,
        system_id: Option<&str>,
        dates: &BTreeSet<NaiveDate>,
    ) -> Result<Vec<Selection>, StoreError> {
        let state = self.state.read();
        let mut rows: Vec<Selection> = state
            .rows
            .values()
            .filter(|row| row.is_open() && dates.contains(&row.date))
            .filter(|row| system_id.map_or(true, |id| row.system_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.system_id
                .cmp(&b.system_id)
                .then(a.row_order.cmp(&b.row_order))
        });
        Ok(rows)
    }

    async fn system_ids(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.read();
        let ids: BTreeSet<String> = state.rows.values().map(|row| row.system_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    async fn upsert(&self, selection: &Selection) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.check_row_order(selection)?;
        state.put(selection.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.write().rows.remove(&id).is_some())
    }

    async fn commit(&self, changes: &LedgerChanges) -> Result<(), StoreError> {
        changes.validate()?;

        let mut state = self.state.write();

        // Validate against the post-delete view before touching anything.
        let mut staged = MemoryState {
            rows: state.rows.clone(),
            sequences: HashMap::new(),
        };
        for id in &changes.deletes {
            staged.rows.remove(id);
        }
        for row in &changes.upserts {
            staged.check_row_order(row)?;
            staged.rows.insert(row.id, row.clone());
        }

        for id in &changes.deletes {
            state.rows.remove(id);
        }
        for row in &changes.upserts {
            state.put(row.clone());
        }

        tracing::debug!(
            system_id = %changes.system_id,
            upserts = changes.upserts.len(),
            deletes = changes.deletes.len(),
            "Committed ledger changes"
        );
        Ok(())
    }

    async fn lock_system(&self, system_id: &str) -> Result<SystemLease, StoreError> {
        Ok(SystemLease::local(system_id, self.leases.lock(system_id).await))
    }
}
