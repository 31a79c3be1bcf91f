//! Selection data model: one lay bet in a system's ledger.
//!
//! A selection sits at a fixed `row_order` inside its system. Running totals
//! are prefix sums over that order, so the model only exposes the per-row
//! contributions; computing the sums is the recompute engine's job.

use chrono::{DateTime, NaiveDate, Utc};
use racing_ledger_core::{RaceResult, SettledPl};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input for creating a selection. `row_order` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSelection {
    /// Owning trading system.
    pub system_id: String,
    /// Race date.
    pub date: NaiveDate,
    /// Scheduled off time as published (e.g. "14:30").
    pub time: String,
    /// Country code of the meeting.
    pub country: String,
    /// Course name.
    pub meeting: String,
    /// Horse name.
    pub horse: String,
    /// Win-market lay price, if known before the off.
    pub win_bsp: Option<Decimal>,
    /// Place-market lay price, if known before the off.
    pub place_bsp: Option<Decimal>,
}

impl NewSelection {
    /// Creates a selection input without prices.
    #[must_use]
    pub fn new(
        system_id: impl Into<String>,
        date: NaiveDate,
        time: impl Into<String>,
        horse: impl Into<String>,
    ) -> Self {
        Self {
            system_id: system_id.into(),
            date,
            time: time.into(),
            country: String::new(),
            meeting: String::new(),
            horse: horse.into(),
            win_bsp: None,
            place_bsp: None,
        }
    }

    /// Sets the meeting and its country.
    #[must_use]
    pub fn at(mut self, meeting: impl Into<String>, country: impl Into<String>) -> Self {
        self.meeting = meeting.into();
        self.country = country.into();
        self
    }
}

/// A selection record in a system's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Primary key.
    pub id: Uuid,
    /// Owning trading system; partitions the ledger.
    pub system_id: String,
    /// Position in the system's ledger. Unique per system, never reused.
    pub row_order: i64,
    /// Race date.
    pub date: NaiveDate,
    /// Scheduled off time as published.
    pub time: String,
    /// Country code of the meeting.
    pub country: String,
    /// Course name.
    pub meeting: String,
    /// Horse name.
    pub horse: String,
    /// Whether a result has been attached.
    pub has_result: bool,
    /// Attached result, if any.
    pub result: Option<RaceResult>,
    /// Win-market lay price.
    pub win_bsp: Option<Decimal>,
    /// Place-market lay price.
    pub place_bsp: Option<Decimal>,
    /// Win-market P/L, full precision.
    pub win_pl: Option<Decimal>,
    /// Place-market P/L; `None` when the place market is not offered.
    pub place_pl: Option<Decimal>,
    /// Prefix sum of `win_pl` up to and including this row.
    pub running_win_pl: Decimal,
    /// Prefix sum of non-null `place_pl`; `None` until the first one.
    pub running_place_pl: Option<Decimal>,
    /// UI notification flag.
    pub is_new: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Selection {
    /// Builds an unresulted selection at `row_order`.
    #[must_use]
    pub fn from_new(new: NewSelection, row_order: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_id: new.system_id,
            row_order,
            date: new.date,
            time: new.time,
            country: new.country,
            meeting: new.meeting,
            horse: new.horse,
            has_result: false,
            result: None,
            win_bsp: new.win_bsp,
            place_bsp: new.place_bsp,
            win_pl: None,
            place_pl: None,
            running_win_pl: Decimal::ZERO,
            running_place_pl: None,
            is_new: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attaches a result and its computed P/L.
    ///
    /// Prices that are `None` keep whatever the selection already carried.
    pub fn apply_result(
        &mut self,
        result: RaceResult,
        win_bsp: Option<Decimal>,
        place_bsp: Option<Decimal>,
        pl: SettledPl,
        now: DateTime<Utc>,
    ) {
        self.has_result = true;
        self.result = Some(result);
        if win_bsp.is_some() {
            self.win_bsp = win_bsp;
        }
        if place_bsp.is_some() {
            self.place_bsp = place_bsp;
        }
        self.win_pl = Some(pl.win_pl);
        self.place_pl = pl.place_pl;
        self.is_new = true;
        self.updated_at = now;
    }

    /// Administrative reset: removes the result and its P/L.
    pub fn clear_result(&mut self, now: DateTime<Utc>) {
        self.has_result = false;
        self.result = None;
        self.win_pl = None;
        self.place_pl = None;
        self.updated_at = now;
    }

    /// Amount this row adds to the running win total.
    #[must_use]
    pub fn win_contribution(&self) -> Decimal {
        if self.has_result {
            self.win_pl.unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    }

    /// Amount this row adds to the running place total, if it carries one.
    #[must_use]
    pub fn place_contribution(&self) -> Option<Decimal> {
        if self.has_result {
            self.place_pl
        } else {
            None
        }
    }

    /// Returns true if the selection is still waiting for a result.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.has_result
    }
}
