//! Verify command: audits ledger invariants, optionally rebuilding running
//! totals.

use anyhow::{bail, Result};
use clap::Args;
use racing_ledger_data::LedgerStore;
use racing_ledger_reconcile::{Violation, ViolationKind};

/// Arguments for the verify command.
#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// System to verify (defaults to every system in the ledger)
    #[arg(short, long)]
    pub system: Option<String>,

    /// Rebuild running totals of systems whose totals are wrong
    #[arg(long)]
    pub repair: bool,

    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Database connection URL (overrides the config file)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Runs the verify command.
///
/// # Errors
/// Returns an error if the database is unreachable, or if violations remain
/// after the (optional) repair.
pub async fn run_verify(args: VerifyArgs) -> Result<()> {
    let config = super::load_config(&args.config, args.db_url.as_deref())?;
    let engine = super::connect_engine(config).await?;

    let systems = match args.system {
        Some(system) => vec![system],
        None => engine.store().system_ids().await?,
    };

    let mut remaining = 0;
    for system in &systems {
        let mut violations = engine.verify_system(system).await?;

        if args.repair && violations.iter().any(is_running_total) {
            let summary = engine.rebuild_system(system).await?;
            println!("{system}: rebuilt running totals on {} row(s)", summary.rows_changed());
            violations = engine.verify_system(system).await?;
        }

        if violations.is_empty() {
            println!("{system}: OK");
        } else {
            println!("{system}: {} violation(s)", violations.len());
            for violation in &violations {
                println!("  {}", describe(violation));
            }
            remaining += violations.len();
        }
    }

    if remaining > 0 {
        bail!("{remaining} ledger violation(s) found");
    }
    Ok(())
}

fn is_running_total(violation: &Violation) -> bool {
    matches!(
        violation.kind,
        ViolationKind::RunningWin { .. } | ViolationKind::RunningPlace { .. }
    )
}

fn describe(violation: &Violation) -> String {
    let detail = match &violation.kind {
        ViolationKind::DuplicateRowOrder => "row order used twice".to_string(),
        ViolationKind::OutOfOrder { previous } => format!("out of order after row {previous}"),
        ViolationKind::RunningWin { expected, found } => {
            format!("running win P/L is {found}, expected {expected}")
        }
        ViolationKind::RunningPlace { expected, found } => format!(
            "running place P/L is {}, expected {}",
            fmt_opt(*found),
            fmt_opt(*expected)
        ),
        ViolationKind::PlMismatch {
            expected_win,
            expected_place,
        } => format!(
            "P/L does not match result (expected win {expected_win}, place {})",
            fmt_opt(*expected_place)
        ),
        ViolationKind::Unpriceable { reason } => format!("result cannot be priced: {reason}"),
        ViolationKind::StaleResult => "result flag, result and P/L disagree".to_string(),
    };
    format!("row {} ({}): {detail}", violation.row_order, violation.id)
}

fn fmt_opt(value: Option<rust_decimal::Decimal>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}
