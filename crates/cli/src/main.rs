use clap::{Parser, Subcommand};

mod commands;
mod ingest;

use commands::{
    AddArgs, DeleteArgs, EditResultArgs, MigrateArgs, ReconcileArgs, ResetResultArgs, VerifyArgs,
};

#[derive(Parser)]
#[command(name = "racing-ledger")]
#[command(about = "Selection ledger and settlement reconciliation for racing systems", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Settle open selections from a results feed CSV
    Reconcile(ReconcileArgs),
    /// Audit running totals and ordering of one or all systems
    Verify(VerifyArgs),
    /// Append a selection to a system's ledger
    Add(AddArgs),
    /// Record or overwrite the result of a selection
    EditResult(EditResultArgs),
    /// Clear the result of a selection
    ResetResult(ResetResultArgs),
    /// Remove a selection from the ledger
    Delete(DeleteArgs),
    /// Apply database migrations
    Migrate(MigrateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Reconcile(args) => commands::run_reconcile(args).await?,
        Commands::Verify(args) => commands::run_verify(args).await?,
        Commands::Add(args) => commands::run_add(args).await?,
        Commands::EditResult(args) => commands::run_edit_result(args).await?,
        Commands::ResetResult(args) => commands::run_reset_result(args).await?,
        Commands::Delete(args) => commands::run_delete(args).await?,
        Commands::Migrate(args) => commands::run_migrate(args).await?,
    }

    Ok(())
}
