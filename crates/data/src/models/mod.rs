//! Data models for the selection ledger.
//!
//! All monetary values use `rust_decimal::Decimal` so running totals are
//! exact sums of the per-row values.

pub mod selection;

pub use selection::{NewSelection, Selection};
