//! Ledger engine: serialized, atomic mutations of a system's ledger.
//!
//! Every operation takes the system's in-process lock, then runs its
//! read-modify-commit body inside a spawned task that owns the guard. The
//! task first takes the store's lease on the system, which excludes writers
//! in other processes, and holds it until the commit has landed. Once the
//! in-process lock is held the body runs to completion even if the caller
//! goes away; a caller that gives up while still waiting leaves nothing
//! behind.
//!
//! Single-row operations (create, edit, reset, delete) use the incremental
//! suffix walk. Batch settlement (see [`crate::reconciler`]) uses the full
//! per-system pass.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use racing_ledger_core::{settle, LedgerConfig, RaceResult};
use racing_ledger_data::{
    LedgerChanges, LedgerStore, NewSelection, Selection, StoreError, SystemLocks,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{audit, Violation};
use crate::error::LedgerError;
use crate::matcher::MatchConfig;
use crate::recompute::{recompute_full, recompute_suffix, RecomputeSummary, RunningTotals};

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Administrative result edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEdit {
    /// New result.
    pub result: RaceResult,
    /// Win price; `None` keeps the price already on the row.
    pub win_bsp: Option<Decimal>,
    /// Place price; `None` keeps the price already on the row.
    pub place_bsp: Option<Decimal>,
}

impl ResultEdit {
    /// Edit that keeps the row's prices.
    #[must_use]
    pub fn new(result: RaceResult) -> Self {
        Self {
            result,
            win_bsp: None,
            place_bsp: None,
        }
    }

    /// Sets the win price.
    #[must_use]
    pub fn with_win_bsp(mut self, price: Decimal) -> Self {
        self.win_bsp = Some(price);
        self
    }

    /// Sets the place price.
    #[must_use]
    pub fn with_place_bsp(mut self, price: Decimal) -> Self {
        self.place_bsp = Some(price);
        self
    }
}

/// What a deletion did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    /// Deleted selection.
    pub id: Uuid,
    /// Its system.
    pub system_id: String,
    /// Its retired position.
    pub row_order: i64,
    /// Whether it carried a result (and so forced a recompute).
    pub had_result: bool,
    /// Later rows whose running totals changed.
    pub rows_recomputed: usize,
}

// =============================================================================
// Engine
// =============================================================================

/// Ledger engine over a [`LedgerStore`].
pub struct LedgerEngine<S> {
    pub(crate) store: Arc<S>,
    pub(crate) locks: Arc<SystemLocks>,
    pub(crate) config: Arc<LedgerConfig>,
    pub(crate) matching: MatchConfig,
}

impl<S> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            config: Arc::clone(&self.config),
            matching: self.matching,
        }
    }
}

impl<S: LedgerStore + 'static> LedgerEngine<S> {
    /// Creates an engine with default matching thresholds.
    #[must_use]
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self {
            store,
            locks: Arc::new(SystemLocks::new()),
            config: Arc::new(config),
            matching: MatchConfig::default(),
        }
    }

    /// Overrides the matching thresholds.
    #[must_use]
    pub fn with_match_config(mut self, matching: MatchConfig) -> Self {
        self.matching = matching;
        self
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Per-system market setup.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Runs `work` under the locks of `system_id`.
    ///
    /// The in-process lock is acquired first. `work` is only polled inside a
    /// spawned task, after the store lease is held as well; the lease is
    /// released once `work` finishes.
    ///
    /// # Errors
    /// Returns [`LedgerError::Store`] if the lease cannot be taken and
    /// [`LedgerError::Aborted`] if the task panicked.
    pub(crate) async fn exclusive<F>(&self, system_id: &str, work: F) -> Result<F::Output, LedgerError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.locks.lock(system_id).await;
        let store = Arc::clone(&self.store);
        let system_id = system_id.to_string();

        tokio::spawn(async move {
            let lease = store.lock_system(&system_id).await?;
            let output = work.await;
            if let Err(e) = lease.release().await {
                warn!(system_id = %system_id, error = %e, "Failed to release ledger lease");
            }
            drop(guard);
            Ok::<_, LedgerError>(output)
        })
        .await
        .map_err(aborted)?
    }

    /// Appends a new, unresulted selection to its system's ledger.
    ///
    /// # Errors
    /// Returns an error if the store fails; nothing is written in that case
    /// (the sequence value may still be consumed).
    pub async fn create_selection(&self, new: NewSelection) -> Result<Selection, LedgerError> {
        let system_id = new.system_id.clone();
        let store = Arc::clone(&self.store);

        let work = async move {
            let row_order = store.next_row_order(&new.system_id).await?;
            let preceding = store.find_preceding(&new.system_id, row_order).await?;

            let mut selection = Selection::from_new(new, row_order, Utc::now());
            recompute_suffix(
                RunningTotals::seed(preceding.as_ref()),
                std::slice::from_mut(&mut selection),
            );

            let mut changes = LedgerChanges::new(selection.system_id.clone());
            changes.upsert(selection.clone());
            store.commit(&changes).await?;

            info!(
                system_id = %selection.system_id,
                id = %selection.id,
                row_order = selection.row_order,
                "Created selection"
            );
            Ok::<_, LedgerError>(selection)
        };

        self.exclusive(&system_id, work).await?
    }

    /// Sets (or replaces) a selection's result and recomputes the rows after
    /// it.
    ///
    /// # Errors
    /// Returns [`LedgerError::NotFound`] for an unknown id,
    /// [`LedgerError::Pricing`] if the result cannot be priced, or a store
    /// error. The ledger is unchanged on error.
    pub async fn edit_result(&self, id: Uuid, edit: ResultEdit) -> Result<Selection, LedgerError> {
        let system_id = self.system_of(id).await?;
        let store = Arc::clone(&self.store);
        let profile = self.config.profile_for(&system_id);

        let work = async move {
            let mut row = store.get(id).await?.ok_or(LedgerError::NotFound(id))?;
            let win_bsp = edit.win_bsp.or(row.win_bsp);
            let place_bsp = edit.place_bsp.or(row.place_bsp);
            let pl = settle(edit.result, win_bsp, place_bsp, &profile)?;

            let now = Utc::now();
            row.apply_result(edit.result, win_bsp, place_bsp, pl, now);

            let mut changes = LedgerChanges::new(row.system_id.clone());
            let (row, summary) = rewrite_from(store.as_ref(), row, now, &mut changes).await?;
            store.commit(&changes).await?;

            info!(
                system_id = %row.system_id,
                id = %id,
                result = %edit.result,
                win_pl = %pl.win_pl,
                rows_recomputed = summary.rows_changed(),
                "Edited result"
            );
            Ok::<_, LedgerError>(row)
        };

        self.exclusive(&system_id, work).await?
    }

    /// Administrative reset: clears a selection's result and P/L.
    ///
    /// Resetting an unresulted selection changes nothing.
    ///
    /// # Errors
    /// Returns [`LedgerError::NotFound`] for an unknown id, or a store error.
    pub async fn reset_result(&self, id: Uuid) -> Result<Selection, LedgerError> {
        let system_id = self.system_of(id).await?;
        let store = Arc::clone(&self.store);

        let work = async move {
            let mut row = store.get(id).await?.ok_or(LedgerError::NotFound(id))?;
            if row.is_open() {
                debug!(id = %id, "Reset of unresulted selection is a no-op");
                return Ok::<_, LedgerError>(row);
            }

            let now = Utc::now();
            row.clear_result(now);

            let mut changes = LedgerChanges::new(row.system_id.clone());
            let (row, summary) = rewrite_from(store.as_ref(), row, now, &mut changes).await?;
            store.commit(&changes).await?;

            info!(
                system_id = %row.system_id,
                id = %id,
                rows_recomputed = summary.rows_changed(),
                "Reset result"
            );
            Ok(row)
        };

        self.exclusive(&system_id, work).await?
    }

    /// Deletes a selection. Later rows are recomputed only if it carried a
    /// result. Its `row_order` is never handed out again.
    ///
    /// # Errors
    /// Returns [`LedgerError::NotFound`] for an unknown id, or a store error.
    pub async fn delete_selection(&self, id: Uuid) -> Result<DeleteOutcome, LedgerError> {
        let system_id = self.system_of(id).await?;
        let store = Arc::clone(&self.store);

        let work = async move {
            let row = store.get(id).await?.ok_or(LedgerError::NotFound(id))?;
            let mut changes = LedgerChanges::new(row.system_id.clone());
            changes.delete(id);

            let mut rows_recomputed = 0;
            if row.has_result {
                let preceding = store.find_preceding(&row.system_id, row.row_order).await?;
                let mut suffix = store
                    .find_by_system_ordered_from(&row.system_id, row.row_order + 1)
                    .await?;
                let summary = recompute_suffix(RunningTotals::seed(preceding.as_ref()), &mut suffix);
                rows_recomputed = summary.rows_changed();
                stage_changed(suffix, &summary, &[], Utc::now(), &mut changes);
            }

            store.commit(&changes).await?;

            info!(
                system_id = %row.system_id,
                id = %id,
                row_order = row.row_order,
                had_result = row.has_result,
                rows_recomputed,
                "Deleted selection"
            );
            Ok::<_, LedgerError>(DeleteOutcome {
                id,
                system_id: row.system_id,
                row_order: row.row_order,
                had_result: row.has_result,
                rows_recomputed,
            })
        };

        self.exclusive(&system_id, work).await?
    }

    /// Audits a system's ledger.
    ///
    /// # Errors
    /// Returns a store error if the ledger cannot be read.
    pub async fn verify_system(&self, system_id: &str) -> Result<Vec<Violation>, LedgerError> {
        let store = Arc::clone(&self.store);
        let profile = self.config.profile_for(system_id);
        let owned_id = system_id.to_string();

        let work = async move {
            let rows = store.find_by_system(&owned_id).await?;
            let violations = audit(&rows, &profile);
            if violations.is_empty() {
                debug!(system_id = %owned_id, rows = rows.len(), "Ledger verified");
            } else {
                warn!(system_id = %owned_id, violations = violations.len(), "Ledger invariants violated");
            }
            Ok::<_, LedgerError>(violations)
        };

        self.exclusive(system_id, work).await?
    }

    /// Rebuilds every running total of a system in one pass and commits the
    /// rows that changed.
    ///
    /// # Errors
    /// Returns a store error; the ledger is unchanged in that case.
    pub async fn rebuild_system(&self, system_id: &str) -> Result<RecomputeSummary, LedgerError> {
        let store = Arc::clone(&self.store);
        let owned_id = system_id.to_string();

        let work = async move {
            let mut rows = store.find_by_system(&owned_id).await?;
            let summary = recompute_full(&mut rows);

            let mut changes = LedgerChanges::new(owned_id.clone());
            stage_changed(rows, &summary, &[], Utc::now(), &mut changes);
            store.commit(&changes).await?;

            info!(
                system_id = %owned_id,
                rows_walked = summary.rows_walked,
                rows_recomputed = summary.rows_changed(),
                "Rebuilt running totals"
            );
            Ok::<_, LedgerError>(summary)
        };

        self.exclusive(system_id, work).await?
    }

    async fn system_of(&self, id: Uuid) -> Result<String, LedgerError> {
        self.store
            .get(id)
            .await?
            .map(|row| row.system_id)
            .ok_or(LedgerError::NotFound(id))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn aborted(error: JoinError) -> LedgerError {
    LedgerError::Aborted(error.to_string())
}

/// Replaces the stored copy of `edited` with the given one, walks the suffix
/// from it and stages the edited row plus every row whose totals changed.
async fn rewrite_from<S: LedgerStore + ?Sized>(
    store: &S,
    edited: Selection,
    now: DateTime<Utc>,
    changes: &mut LedgerChanges,
) -> Result<(Selection, RecomputeSummary), LedgerError> {
    let preceding = store.find_preceding(&edited.system_id, edited.row_order).await?;
    let mut suffix = store
        .find_by_system_ordered_from(&edited.system_id, edited.row_order)
        .await?;

    match suffix.first_mut() {
        Some(first) if first.id == edited.id => *first = edited,
        _ => return Err(StoreError::NotFound(edited.id).into()),
    }

    let summary = recompute_suffix(RunningTotals::seed(preceding.as_ref()), &mut suffix);
    let row = suffix[0].clone();
    stage_changed(suffix, &summary, &[0], now, changes);
    Ok((row, summary))
}

/// Stages rows listed in `always` plus every row whose running totals
/// changed. Recomputed rows get a fresh `updated_at`.
pub(crate) fn stage_changed(
    rows: Vec<Selection>,
    summary: &RecomputeSummary,
    always: &[usize],
    now: DateTime<Utc>,
    changes: &mut LedgerChanges,
) {
    let changed: HashSet<usize> = summary.changed.iter().copied().collect();
    let always: HashSet<usize> = always.iter().copied().collect();
    for (idx, mut row) in rows.into_iter().enumerate() {
        let recomputed = changed.contains(&idx);
        if recomputed {
            row.updated_at = now;
        }
        if recomputed || always.contains(&idx) {
            changes.upsert(row);
        }
    }
}
