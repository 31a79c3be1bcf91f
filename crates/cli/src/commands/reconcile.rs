//! Reconcile command: settles open selections from a results CSV.
//!
//! With `--dry-run` the ledger is copied into memory and the batch is run
//! against the copy, so the report shows what would change without writing
//! anything.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use racing_ledger_core::display_pl;
use racing_ledger_data::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use racing_ledger_reconcile::{
    validate_schema, LedgerEngine, ReconciliationReport, UnmatchedReason,
};

use crate::ingest;

/// Arguments for the reconcile command.
#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    /// Settlement feed CSV file
    #[arg(short, long)]
    pub feed: PathBuf,

    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Database connection URL (overrides the config file)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,

    /// Run against an in-memory copy of the ledger and write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Runs the reconcile command.
///
/// # Errors
/// Returns an error if the feed is unreadable or malformed, the database is
/// unreachable, or any system failed to settle.
pub async fn run_reconcile(args: ReconcileArgs) -> Result<()> {
    let batch = ingest::read_feed(&args.feed)?;
    // Reject a malformed feed before touching the database.
    validate_schema(&batch.columns).context("Settlement feed rejected")?;
    tracing::info!(
        feed = %args.feed.display(),
        rows = batch.rows.len(),
        dry_run = args.dry_run,
        "Loaded settlement feed"
    );

    let config = super::load_config(&args.config, args.db_url.as_deref())?;
    let engine = super::connect_engine(config).await?;

    let report = if args.dry_run {
        let copy = copy_ledger(engine.store()).await?;
        let dry = LedgerEngine::new(Arc::new(copy), engine.config().clone());
        dry.reconcile(&batch).await?
    } else {
        engine.reconcile(&batch).await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.dry_run);
    }

    if !report.failed_systems.is_empty() {
        bail!(
            "{} system(s) failed to settle; their ledgers are unchanged",
            report.failed_systems.len()
        );
    }
    Ok(())
}

/// Copies every system's ledger into a fresh in-memory store.
async fn copy_ledger(store: &PgLedgerStore) -> Result<InMemoryLedgerStore> {
    let copy = InMemoryLedgerStore::new();
    for system_id in store.system_ids().await? {
        for row in store.find_by_system(&system_id).await? {
            copy.upsert(&row).await?;
        }
    }
    tracing::debug!(rows = copy.len(), "Copied ledger for dry run");
    Ok(copy)
}

fn print_report(report: &ReconciliationReport, dry_run: bool) {
    println!();
    println!("=== Reconciliation{} ===", if dry_run { " (dry run)" } else { "" });
    println!("Batch:              {}", report.batch_id);
    println!("Feed rows:          {}", report.feed_rows);
    println!("Settled:            {}", report.matched_count);
    println!("Not yet settled:    {}", report.not_yet_settled.len());
    println!("Row errors:         {}", report.row_errors.len());

    if !report.systems.is_empty() {
        println!();
        println!("{:<24} {:>8} {:>10} {:>12} {:>12}", "System", "Settled", "Recomputed", "Win P/L", "Place P/L");
        for system in &report.systems {
            println!(
                "{:<24} {:>8} {:>10} {:>12} {:>12}",
                system.system_id,
                system.settled,
                system.rows_recomputed,
                display_pl(system.closing_win_pl),
                system
                    .closing_place_pl
                    .map_or_else(|| "-".to_string(), |p| display_pl(p).to_string()),
            );
        }
    }

    if !report.failed_systems.is_empty() {
        println!();
        println!("Failed systems (unchanged):");
        for failure in &report.failed_systems {
            println!(
                "  {} at {}: {} ({} pending)",
                failure.system_id,
                failure.stage,
                failure.error,
                failure.pending.len()
            );
        }
    }

    if !report.row_errors.is_empty() {
        println!();
        println!("Row errors:");
        for error in &report.row_errors {
            println!(
                "  line {}{}: {}",
                error.line,
                error.column.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default(),
                error.message
            );
        }
    }

    if !report.unmatched_feed_rows.is_empty() {
        println!();
        println!("Unmatched feed rows:");
        for row in &report.unmatched_feed_rows {
            let reason = match &row.reason {
                UnmatchedReason::NoCandidate => "no open selection".to_string(),
                UnmatchedReason::Duplicate { first_line } => format!("duplicate of line {first_line}"),
            };
            println!("  line {}: {} {} {} ({reason})", row.line, row.date, row.time, row.horse);
        }
    }

    if !report.unmatched_selections.is_empty() {
        println!();
        println!("Open selections with no feed row:");
        for selection in &report.unmatched_selections {
            println!(
                "  {} #{}: {} {} {}",
                selection.system_id, selection.row_order, selection.date, selection.time, selection.horse
            );
        }
    }
    println!();
}
