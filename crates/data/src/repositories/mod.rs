//! Ledger repositories.
//!
//! [`LedgerStore`] is the persistence contract the reconciliation engine is
//! written against. Every read returns rows in ascending `row_order`, which
//! is the ledger's source of truth (not the race date).

pub mod memory;
pub mod selection_repo;

pub use memory::InMemoryLedgerStore;
pub use selection_repo::PgLedgerStore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::locks::SystemLease;
use crate::models::Selection;

/// Errors returned by ledger stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Selection does not exist.
    #[error("selection not found: {0}")]
    NotFound(Uuid),

    /// Another selection already holds this position.
    #[error("row order {row_order} already used in system {system_id}")]
    DuplicateRowOrder {
        /// System the conflict occurred in.
        system_id: String,
        /// Conflicting position.
        row_order: i64,
    },

    /// A change set touched a row belonging to another system.
    #[error("change set for system {expected} contains a row of system {found}")]
    CrossSystem {
        /// System named by the change set.
        expected: String,
        /// System of the offending row.
        found: String,
    },

    /// A stored row could not be mapped back into a selection.
    #[error("corrupt selection {id}: {reason}")]
    Corrupt {
        /// Row identifier.
        id: Uuid,
        /// What was wrong with it.
        reason: String,
    },

    /// Store refused the operation (e.g. connection lost mid-transaction).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A set of mutations scoped to one system, applied atomically by
/// [`LedgerStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    /// System every row in the change set belongs to.
    pub system_id: String,
    /// Rows to insert or overwrite.
    pub upserts: Vec<Selection>,
    /// Rows to remove.
    pub deletes: Vec<Uuid>,
}

impl LedgerChanges {
    /// Creates an empty change set for `system_id`.
    #[must_use]
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            upserts: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Queues a row for insert/update.
    pub fn upsert(&mut self, selection: Selection) {
        self.upserts.push(selection);
    }

    /// Queues a row for deletion.
    pub fn delete(&mut self, id: Uuid) {
        self.deletes.push(id);
    }

    /// Returns true if nothing would be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    /// Number of queued mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }

    /// Checks every queued row belongs to the change set's system.
    ///
    /// # Errors
    /// Returns [`StoreError::CrossSystem`] on the first foreign row.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self
            .upserts
            .iter()
            .find(|row| row.system_id != self.system_id)
        {
            Some(row) => Err(StoreError::CrossSystem {
                expected: self.system_id.clone(),
                found: row.system_id.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Persistence contract for the selection ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Hands out the next `row_order` for a system. Atomic; never reuses a
    /// value, even after deletions.
    async fn next_row_order(&self, system_id: &str) -> Result<i64, StoreError>;

    /// Loads one selection.
    async fn get(&self, id: Uuid) -> Result<Option<Selection>, StoreError>;

    /// Rows of a system with `row_order >= from_row_order`, ascending.
    async fn find_by_system_ordered_from(
        &self,
        system_id: &str,
        from_row_order: i64,
    ) -> Result<Vec<Selection>, StoreError>;

    /// The row immediately before `row_order` in a system, if any.
    async fn find_preceding(
        &self,
        system_id: &str,
        row_order: i64,
    ) -> Result<Option<Selection>, StoreError>;

    /// Unresulted rows on any of `dates`, optionally restricted to one
    /// system. Ordered by system, then `row_order`.
    async fn find_unresulted(
        &self,
        system_id: Option<&str>,
        dates: &BTreeSet<NaiveDate>,
    ) -> Result<Vec<Selection>, StoreError>;

    /// Distinct system identifiers present in the ledger.
    async fn system_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Inserts or overwrites one selection.
    async fn upsert(&self, selection: &Selection) -> Result<(), StoreError>;

    /// Deletes one selection. Returns false if it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Applies a change set atomically: either every mutation lands or none.
    async fn commit(&self, changes: &LedgerChanges) -> Result<(), StoreError>;

    /// Waits for exclusive write access to a system's ledger across every
    /// client of this store. Reads that feed a commit must happen while the
    /// lease is held.
    async fn lock_system(&self, system_id: &str) -> Result<SystemLease, StoreError>;

    /// The full ledger of a system, ascending.
    async fn find_by_system(&self, system_id: &str) -> Result<Vec<Selection>, StoreError> {
        self.find_by_system_ordered_from(system_id, i64::MIN).await
    }
}
