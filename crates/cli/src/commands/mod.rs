//! CLI commands for the selection ledger.

pub mod admin;
pub mod migrate;
pub mod reconcile;
pub mod verify;

pub use admin::{
    run_add, run_delete, run_edit_result, run_reset_result, AddArgs, DeleteArgs, EditResultArgs,
    ResetResultArgs,
};
pub use migrate::{run_migrate, MigrateArgs};
pub use reconcile::{run_reconcile, ReconcileArgs};
pub use verify::{run_verify, VerifyArgs};

use std::sync::Arc;

use anyhow::{Context, Result};
use racing_ledger_core::{AppConfig, ConfigLoader};
use racing_ledger_data::PgLedgerStore;
use racing_ledger_reconcile::LedgerEngine;

/// Loads configuration rooted at `path`, with an optional database URL
/// override from the command line.
pub(crate) fn load_config(path: &str, db_url: Option<&str>) -> Result<AppConfig> {
    let mut config =
        ConfigLoader::load_from(path).with_context(|| format!("Failed to load config from {path}"))?;
    if let Some(url) = db_url {
        config.database.url = url.to_string();
    }
    Ok(config)
}

/// Connects to the database and builds an engine over it.
pub(crate) async fn connect_engine(config: AppConfig) -> Result<LedgerEngine<PgLedgerStore>> {
    let pool = racing_ledger_data::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    Ok(LedgerEngine::new(Arc::new(PgLedgerStore::new(pool)), config.ledger))
}
