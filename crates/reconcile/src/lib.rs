//! Running-total recomputation and settlement reconciliation for the
//! selection ledger.
//!
//! This crate provides:
//! - Incremental (suffix) and full per-system running-total recomputation
//! - The settlement feed parser and the composite-key matcher
//! - The ledger engine: per-system serialized create, edit, reset, delete
//!   and verify operations
//! - Batch reconciliation producing a [`ReconciliationReport`]
//! - An invariant auditor for a system's ledger

pub mod audit;
pub mod engine;
pub mod error;
pub mod feed;
pub mod matcher;
pub mod recompute;
pub mod reconciler;
pub mod report;

#[cfg(test)]
mod test_support;

pub use audit::{audit, Violation, ViolationKind};
pub use engine::{DeleteOutcome, LedgerEngine, ResultEdit};
pub use error::{LedgerError, ReconcileError};
pub use feed::{
    columns, parse_batch, parse_date, parse_decimal, parse_row, validate_schema, FeedBatch,
    FeedError, FeedRow, ParsedFeed, RawFeedRow, RowError,
};
pub use matcher::{
    derive_result, MatchConfig, MatchKey, MatchOutcome, NotYetSettled,
    ProposedSettlement, SelectionRef, SettlementMatcher, UnmatchedFeedRow, UnmatchedReason,
};
pub use recompute::{
    recompute_full, recompute_suffix, RecomputeStrategy, RecomputeSummary, RunningTotals,
};
pub use report::{BatchStage, ReconciliationReport, SystemFailure, SystemSettlement};
