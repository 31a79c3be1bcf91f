//! Administrative single-row commands: add, edit-result, reset-result and
//! delete.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::Args;
use racing_ledger_core::{display_pl, RaceResult};
use racing_ledger_data::{NewSelection, Selection};
use racing_ledger_reconcile::{parse_date, ResultEdit};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Connection options shared by the admin commands.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Database connection URL (overrides the config file)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Arguments for the add command.
#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Owning system
    #[arg(short, long)]
    pub system: String,

    /// Race date (YYYY-MM-DD or DD/MM/YYYY)
    #[arg(long, value_parser = parse_race_date)]
    pub date: NaiveDate,

    /// Off time (e.g. 14:30)
    #[arg(long)]
    pub time: String,

    /// Horse name
    #[arg(long)]
    pub horse: String,

    /// Course name
    #[arg(long, default_value = "")]
    pub meeting: String,

    /// Country code of the meeting
    #[arg(long, default_value = "")]
    pub country: String,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Arguments for the edit-result command.
#[derive(Args, Debug, Clone)]
pub struct EditResultArgs {
    /// Selection id
    pub id: Uuid,

    /// Result: WON, LOST, PLACED, NR, VOID or CANCELLED
    #[arg(short, long)]
    pub result: String,

    /// Win price (keeps the stored price if omitted)
    #[arg(long)]
    pub win_bsp: Option<Decimal>,

    /// Place price (keeps the stored price if omitted)
    #[arg(long)]
    pub place_bsp: Option<Decimal>,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Arguments for the reset-result command.
#[derive(Args, Debug, Clone)]
pub struct ResetResultArgs {
    /// Selection id
    pub id: Uuid,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Arguments for the delete command.
#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Selection id
    pub id: Uuid,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

fn parse_race_date(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).ok_or_else(|| format!("invalid date '{value}'"))
}

fn parse_result(value: &str) -> Result<RaceResult> {
    RaceResult::parse(value).ok_or_else(|| {
        anyhow!("unknown result '{value}' (expected WON, LOST, PLACED, NR, VOID or CANCELLED)")
    })
}

async fn engine(
    connection: &ConnectionArgs,
) -> Result<racing_ledger_reconcile::LedgerEngine<racing_ledger_data::PgLedgerStore>> {
    let config = super::load_config(&connection.config, connection.db_url.as_deref())?;
    super::connect_engine(config).await
}

fn print_selection(selection: &Selection) {
    println!("Selection {}", selection.id);
    println!("  System:      {} (row {})", selection.system_id, selection.row_order);
    println!(
        "  Race:        {} {} {} {}",
        selection.date, selection.time, selection.meeting, selection.horse
    );
    match selection.result {
        Some(result) => println!("  Result:      {result}"),
        None => println!("  Result:      -"),
    }
    if let Some(win_pl) = selection.win_pl {
        println!("  Win P/L:     {}", display_pl(win_pl));
    }
    if let Some(place_pl) = selection.place_pl {
        println!("  Place P/L:   {}", display_pl(place_pl));
    }
    println!("  Running win: {}", display_pl(selection.running_win_pl));
    if let Some(running_place) = selection.running_place_pl {
        println!("  Running place: {}", display_pl(running_place));
    }
}

/// Runs the add command.
///
/// # Errors
/// Returns an error if the database is unreachable or the insert fails.
pub async fn run_add(args: AddArgs) -> Result<()> {
    let engine = engine(&args.connection).await?;
    let new = NewSelection::new(args.system, args.date, args.time, args.horse)
        .at(args.meeting, args.country);
    let selection = engine.create_selection(new).await.context("Failed to add selection")?;
    print_selection(&selection);
    Ok(())
}

/// Runs the edit-result command.
///
/// # Errors
/// Returns an error if the result is unknown or cannot be priced, the
/// selection does not exist, or the database fails.
pub async fn run_edit_result(args: EditResultArgs) -> Result<()> {
    let result = parse_result(&args.result)?;
    let mut edit = ResultEdit::new(result);
    if let Some(price) = args.win_bsp {
        edit = edit.with_win_bsp(price);
    }
    if let Some(price) = args.place_bsp {
        edit = edit.with_place_bsp(price);
    }

    let engine = engine(&args.connection).await?;
    let selection = engine
        .edit_result(args.id, edit)
        .await
        .with_context(|| format!("Failed to edit result of {}", args.id))?;
    print_selection(&selection);
    Ok(())
}

/// Runs the reset-result command.
///
/// # Errors
/// Returns an error if the selection does not exist or the database fails.
pub async fn run_reset_result(args: ResetResultArgs) -> Result<()> {
    let engine = engine(&args.connection).await?;
    let selection = engine
        .reset_result(args.id)
        .await
        .with_context(|| format!("Failed to reset result of {}", args.id))?;
    print_selection(&selection);
    Ok(())
}

/// Runs the delete command.
///
/// # Errors
/// Returns an error if the selection does not exist or the database fails.
pub async fn run_delete(args: DeleteArgs) -> Result<()> {
    let engine = engine(&args.connection).await?;
    let outcome = engine
        .delete_selection(args.id)
        .await
        .with_context(|| format!("Failed to delete {}", args.id))?;
    println!(
        "Deleted {} from {} (row {} retired, {} later row(s) recomputed)",
        outcome.id, outcome.system_id, outcome.row_order, outcome.rows_recomputed
    );
    Ok(())
}
