//! Storage for the per-system selection ledger.
//!
//! This crate provides:
//! - The `Selection` data model
//! - The `LedgerStore` contract used by the reconciliation engine
//! - A `PostgreSQL` implementation with embedded migrations
//! - An in-memory implementation for tests and dry runs
//! - Per-system write locks, in-process and across processes

pub mod database;
pub mod locks;
pub mod models;
pub mod repositories;

pub use database::{connect, run_migrations};
pub use locks::{SystemLease, SystemLocks};
pub use models::{NewSelection, Selection};
pub use repositories::{
    InMemoryLedgerStore, LedgerChanges, LedgerStore, PgLedgerStore, StoreError,
};
