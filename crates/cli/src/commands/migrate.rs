//! Applies the embedded database migrations.

use anyhow::{Context, Result};
use clap::Args;

/// Arguments for the migrate command.
#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Database connection URL (overrides the config file)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,
}

/// Runs the migrate command.
///
/// # Errors
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run_migrate(args: MigrateArgs) -> Result<()> {
    let config = super::load_config(&args.config, args.db_url.as_deref())?;
    let pool = racing_ledger_data::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    racing_ledger_data::run_migrations(&pool)
        .await
        .context("Failed to apply migrations")?;
    println!("Migrations applied.");
    Ok(())
}
