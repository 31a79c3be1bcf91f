//! Settlement feed reconciliation.
//!
//! A batch moves through `Parsed -> Matched -> Settled -> Recomputed ->
//! Reported`:
//!
//! 1. The feed is validated and parsed. A schema error aborts the batch
//!    before anything is read or written; bad rows are collected.
//! 2. Unresulted selections for the feed's dates are loaded and matched.
//! 3. Accepted settlements are grouped by system. Each system is settled
//!    under its own lock (held against other processes too, through the
//!    store's lease), in parallel with the others: the ledger is
//!    re-read, selections settled since matching are skipped, results are
//!    attached, running totals are rebuilt in one pass, and everything is
//!    committed at once.
//! 4. A system that fails is reported with its stage and left exactly as it
//!    was. Other systems are not affected.
//!
//! Nothing is retried automatically.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use racing_ledger_core::SystemProfile;
use racing_ledger_data::{LedgerChanges, LedgerStore, Selection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{stage_changed, LedgerEngine};
use crate::error::ReconcileError;
use crate::feed::{parse_batch, FeedBatch};
use crate::matcher::{ProposedSettlement, SettlementMatcher};
use crate::recompute::{recompute_full, RunningTotals};
use crate::report::{BatchStage, ReconciliationReport, SystemFailure, SystemSettlement};

impl<S: LedgerStore + 'static> LedgerEngine<S> {
    /// Reconciles a settlement feed against the open selections.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Schema`] if required columns are missing and
    /// [`ReconcileError::Store`] if open selections cannot be loaded. In both
    /// cases nothing has been written. Per-system failures after matching do
    /// not error; they are listed in the report.
    pub async fn reconcile(&self, batch: &FeedBatch) -> Result<ReconciliationReport, ReconcileError> {
        let batch_id = Uuid::new_v4();
        let mut report = ReconciliationReport::new(batch_id, batch.rows.len());

        // Parsed
        let parsed = match parse_batch(batch) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "Rejected settlement feed");
                return Err(e.into());
            }
        };
        let dates = parsed.dates();
        info!(
            batch_id = %batch_id,
            rows = parsed.rows.len(),
            row_errors = parsed.errors.len(),
            dates = dates.len(),
            stage = %BatchStage::Parsed,
            "Parsed settlement feed"
        );
        report.row_errors = parsed.errors;

        // Matched
        let open = if dates.is_empty() {
            Vec::new()
        } else {
            self.store.find_unresulted(None, &dates).await?
        };
        let open_count = open.len();
        let outcome = SettlementMatcher::new(self.matching, &self.config).match_feed(&parsed.rows, open);

        report.stage = BatchStage::Matched;
        report.unmatched_feed_rows = outcome.unmatched_feed_rows;
        report.unmatched_selections = outcome.unmatched_selections;
        report.not_yet_settled = outcome.not_yet_settled;
        report.row_errors.extend(outcome.errors);
        info!(
            batch_id = %batch_id,
            open = open_count,
            accepted = outcome.accepted.len(),
            unmatched_feed_rows = report.unmatched_feed_rows.len(),
            unmatched_selections = report.unmatched_selections.len(),
            not_yet_settled = report.not_yet_settled.len(),
            stage = %BatchStage::Matched,
            "Matched settlement feed"
        );

        let mut by_system: BTreeMap<String, Vec<ProposedSettlement>> = BTreeMap::new();
        for proposal in outcome.accepted {
            by_system
                .entry(proposal.system_id().to_string())
                .or_default()
                .push(proposal);
        }

        // Settled + Recomputed, one task per system
        let tasks = by_system.into_iter().map(|(system_id, proposals)| {
            let profile = self.config.profile_for(&system_id);
            let pending: Vec<Uuid> = proposals.iter().map(ProposedSettlement::id).collect();
            let work = settle_system(
                Arc::clone(&self.store),
                batch_id,
                system_id.clone(),
                profile,
                proposals,
            );
            async move {
                match self.exclusive(&system_id, work).await {
                    Ok(result) => result,
                    Err(e) => Err(SystemFailure {
                        system_id,
                        stage: BatchStage::Settled,
                        error: e.to_string(),
                        pending,
                    }),
                }
            }
        });

        for result in join_all(tasks).await {
            match result {
                Ok(settlement) => {
                    report.matched_count += settlement.settled;
                    report.systems.push(settlement);
                }
                Err(failure) => {
                    warn!(
                        batch_id = %batch_id,
                        system_id = %failure.system_id,
                        stage = %failure.stage,
                        error = %failure.error,
                        "System settlement failed"
                    );
                    report.failed_systems.push(failure);
                }
            }
        }

        report.stage = BatchStage::Reported;
        info!(
            batch_id = %batch_id,
            matched = report.matched_count,
            systems = report.systems.len(),
            failed_systems = report.failed_systems.len(),
            stage = %BatchStage::Reported,
            "{}",
            report.summary()
        );
        Ok(report)
    }
}

/// Settles one system's share of a batch. Runs under the system lock.
async fn settle_system<S: LedgerStore + ?Sized>(
    store: Arc<S>,
    batch_id: Uuid,
    system_id: String,
    profile: SystemProfile,
    proposals: Vec<ProposedSettlement>,
) -> Result<SystemSettlement, SystemFailure> {
    let pending: Vec<Uuid> = proposals.iter().map(ProposedSettlement::id).collect();
    let fail = |stage: BatchStage, error: String| SystemFailure {
        system_id: system_id.clone(),
        stage,
        error,
        pending: pending.clone(),
    };

    let mut rows: Vec<Selection> = store
        .find_by_system(&system_id)
        .await
        .map_err(|e| fail(BatchStage::Settled, e.to_string()))?;
    let positions: HashMap<Uuid, usize> = rows.iter().enumerate().map(|(idx, row)| (row.id, idx)).collect();

    let now = Utc::now();
    let mut settled = Vec::new();
    let mut already_settled = 0;
    for proposal in &proposals {
        match positions.get(&proposal.id()) {
            Some(&idx) if rows[idx].is_open() => {
                proposal
                    .apply_to(&mut rows[idx], &profile, now)
                    .map_err(|e| fail(BatchStage::Settled, e.to_string()))?;
                settled.push(idx);
            }
            _ => {
                debug!(
                    batch_id = %batch_id,
                    selection = %proposal.id(),
                    "Selection settled or removed since matching"
                );
                already_settled += 1;
            }
        }
    }

    if settled.is_empty() {
        let closing = rows.last().map_or(RunningTotals::ZERO, RunningTotals::recorded_on);
        return Ok(SystemSettlement {
            system_id,
            settled: 0,
            already_settled,
            rows_recomputed: 0,
            closing_win_pl: closing.win,
            closing_place_pl: closing.place,
        });
    }
    debug!(batch_id = %batch_id, system_id = %system_id, settled = settled.len(), stage = %BatchStage::Settled, "Applied results");

    let summary = recompute_full(&mut rows);
    let mut changes = LedgerChanges::new(system_id.clone());
    stage_changed(rows, &summary, &settled, now, &mut changes);

    store
        .commit(&changes)
        .await
        .map_err(|e| fail(BatchStage::Recomputed, e.to_string()))?;

    info!(
        batch_id = %batch_id,
        system_id = %system_id,
        settled = settled.len(),
        already_settled,
        rows_recomputed = summary.rows_changed(),
        stage = %BatchStage::Recomputed,
        "Committed settlements"
    );

    Ok(SystemSettlement {
        system_id,
        settled: settled.len(),
        already_settled,
        rows_recomputed: summary.rows_changed(),
        closing_win_pl: summary.closing.win,
        closing_place_pl: summary.closing.place,
    })
}
