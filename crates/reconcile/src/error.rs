//! Error types for ledger operations and reconciliation.

use racing_ledger_core::PlError;
use racing_ledger_data::StoreError;
use thiserror::Error;
use uuid::Uuid;

use crate::feed::FeedError;

/// Errors from single-row ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Persistence failed; nothing was written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The requested result cannot be priced.
    #[error("cannot price result: {0}")]
    Pricing(#[from] PlError),

    /// Selection does not exist.
    #[error("selection not found: {0}")]
    NotFound(Uuid),

    /// The locked section did not run to completion.
    #[error("ledger operation aborted: {0}")]
    Aborted(String),
}

/// Errors that abort a whole reconciliation batch before any mutation.
///
/// Failures after matching are isolated per system and reported in
/// [`crate::ReconciliationReport::failed_systems`] instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The feed is structurally unusable.
    #[error("invalid feed: {0}")]
    Schema(#[from] FeedError),

    /// Open selections could not be loaded.
    #[error("failed to load open selections: {0}")]
    Store(#[from] StoreError),
}
