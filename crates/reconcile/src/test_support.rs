//! Row builders shared by the unit tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use racing_ledger_core::RaceResult;
use racing_ledger_data::{NewSelection, Selection};
use rust_decimal::Decimal;

pub(crate) const SYSTEM: &str = "lay-system";

pub(crate) fn race_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap()
}

pub(crate) fn open_row(row_order: i64) -> Selection {
    let new = NewSelection::new(SYSTEM, race_date(), "14:30", format!("Horse {row_order}"));
    Selection::from_new(new, row_order, now())
}

/// A settled row with the given P/L. The result is `LOST` with no prices;
/// tests that care about P/L consistency build their rows explicitly.
pub(crate) fn settled_row(row_order: i64, win_pl: Decimal, place_pl: Option<Decimal>) -> Selection {
    let mut row = open_row(row_order);
    row.has_result = true;
    row.result = Some(RaceResult::Lost);
    row.win_pl = Some(win_pl);
    row.place_pl = place_pl;
    row
}
