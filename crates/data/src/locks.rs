//! Per-system write locks.
//!
//! [`SystemLocks`] serializes writers inside one process. [`SystemLease`] is
//! what a [`crate::LedgerStore`] hands out to serialize writers across every
//! process sharing the store: a rewrite of a system's ledger reads, recomputes
//! and commits while holding it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlx::{Connection, PgConnection};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::repositories::StoreError;

/// Advisory lock class of ledger writers. The second key is
/// `hashtext(system_id)`.
pub(crate) const LEDGER_LOCK_CLASS: i32 = 0x4c45_4447;

/// Hands out one async mutex per system identifier.
#[derive(Debug, Default)]
pub struct SystemLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SystemLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `system_id`.
    ///
    /// The guard is owned so it can move into a spawned task.
    pub async fn lock(&self, system_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(system_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of systems that have been locked at least once.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no system has been locked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

enum LeaseHold {
    Local(OwnedMutexGuard<()>),
    /// Dedicated session holding `pg_advisory_lock`. Closing the session
    /// releases the lock even if `release` is never reached.
    Postgres(PgConnection),
}

/// Exclusive write access to one system's ledger, held across every process
/// sharing the store.
///
/// Dropping the lease releases it; [`SystemLease::release`] does so eagerly
/// and reports failures.
pub struct SystemLease {
    system_id: String,
    hold: LeaseHold,
}

impl SystemLease {
    /// Lease backed by a process-local mutex guard.
    #[must_use]
    pub fn local(system_id: impl Into<String>, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            system_id: system_id.into(),
            hold: LeaseHold::Local(guard),
        }
    }

    pub(crate) fn postgres(system_id: impl Into<String>, session: PgConnection) -> Self {
        Self {
            system_id: system_id.into(),
            hold: LeaseHold::Postgres(session),
        }
    }

    /// System this lease covers.
    #[must_use]
    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Lets the next writer in.
    ///
    /// # Errors
    /// Returns an error if the advisory lock could not be released cleanly.
    /// The lock is gone either way once the session closes.
    pub async fn release(self) -> Result<(), StoreError> {
        match self.hold {
            LeaseHold::Local(guard) => drop(guard),
            LeaseHold::Postgres(mut session) => {
                sqlx::query("SELECT pg_advisory_unlock($1, hashtext($2))")
                    .bind(LEDGER_LOCK_CLASS)
                    .bind(&self.system_id)
                    .execute(&mut session)
                    .await?;
                session.close().await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SystemLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.hold {
            LeaseHold::Local(_) => "local",
            LeaseHold::Postgres(_) => "postgres",
        };
        f.debug_struct("SystemLease")
            .field("system_id", &self.system_id)
            .field("kind", &kind)
            .finish()
    }
}
