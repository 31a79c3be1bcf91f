//! Shared fixtures for the reconciliation integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use racing_ledger_core::LedgerConfig;
use racing_ledger_data::{InMemoryLedgerStore, LedgerStore, NewSelection, Selection};
use racing_ledger_reconcile::{columns, FeedBatch, LedgerEngine};
use rust_decimal::Decimal;

pub const DATE: &str = "2025-03-01";

pub const HEADER: [&str; 8] = [
    columns::DATE,
    columns::TIME,
    columns::HORSE,
    columns::WIN_BSP,
    columns::WIN_LAY_RETURN,
    columns::PLACE_BSP,
    columns::PLACE_LAY_RETURN,
    columns::STATUS,
];

pub fn race_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

pub fn memory_engine(config: LedgerConfig) -> LedgerEngine<InMemoryLedgerStore> {
    LedgerEngine::new(Arc::new(InMemoryLedgerStore::new()), config)
}

pub async fn add<S: LedgerStore + 'static>(
    engine: &LedgerEngine<S>,
    system: &str,
    time: &str,
    horse: &str,
) -> Selection {
    engine
        .create_selection(NewSelection::new(system, race_date(), time, horse).at("Kempton", "GB"))
        .await
        .unwrap()
}

/// One feed line: time, horse, win price, win lay return.
pub fn win_line(time: &str, horse: &str, win_bsp: &str, win_return: &str) -> Vec<String> {
    line(time, horse, win_bsp, win_return, "", "", "")
}

pub fn line(
    time: &str,
    horse: &str,
    win_bsp: &str,
    win_return: &str,
    place_bsp: &str,
    place_return: &str,
    status: &str,
) -> Vec<String> {
    [DATE, time, horse, win_bsp, win_return, place_bsp, place_return, status]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

pub fn feed(lines: Vec<Vec<String>>) -> FeedBatch {
    FeedBatch::from_records(&HEADER, lines)
}

pub fn running_win(store: &InMemoryLedgerStore, system: &str) -> Vec<Decimal> {
    store.snapshot(system).iter().map(|r| r.running_win_pl).collect()
}

pub fn running_place(store: &InMemoryLedgerStore, system: &str) -> Vec<Option<Decimal>> {
    store.snapshot(system).iter().map(|r| r.running_place_pl).collect()
}
