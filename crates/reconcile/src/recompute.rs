//! Running-total recomputation.
//!
//! Running totals are prefix sums in `row_order` sequence. Two strategies
//! share one accumulator:
//!
//! - **Incremental**: seed from the row just before an edit (or zero) and
//!   walk the suffix. Used for single-row edits, resets and deletions.
//! - **Full**: one ascending pass over a system's whole ledger. Used after a
//!   settlement batch, however many rows it touched.
//!
//! Both are pure over in-memory rows; callers load the rows, run the pass and
//! commit the rows that changed in a single store transaction.

use racing_ledger_data::Selection;
use rust_decimal::Decimal;
use serde::Serialize;

/// Which recomputation strategy a call site used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecomputeStrategy {
    /// Suffix walk seeded from the preceding row.
    Incremental,
    /// Whole-ledger pass.
    Full,
}

/// Cumulative values carried from one row to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunningTotals {
    /// Running win-market total.
    pub win: Decimal,
    /// Running place-market total; `None` until a row carries a place P/L.
    pub place: Option<Decimal>,
}

impl RunningTotals {
    /// Totals before the first row of a ledger.
    pub const ZERO: Self = Self {
        win: Decimal::ZERO,
        place: None,
    };

    /// Totals as recorded on `row`.
    #[must_use]
    pub fn recorded_on(row: &Selection) -> Self {
        Self {
            win: row.running_win_pl,
            place: row.running_place_pl,
        }
    }

    /// Seed for a suffix walk: the preceding row's recorded totals, or zero.
    #[must_use]
    pub fn seed(preceding: Option<&Selection>) -> Self {
        preceding.map_or(Self::ZERO, Self::recorded_on)
    }

    /// Adds `row`'s own contribution.
    pub fn add(&mut self, row: &Selection) {
        self.win += row.win_contribution();
        if let Some(place) = row.place_contribution() {
            self.place = Some(self.place.unwrap_or(Decimal::ZERO) + place);
        }
    }

    /// Writes the totals onto `row`. Returns true if anything changed.
    fn stamp(&self, row: &mut Selection) -> bool {
        let changed = row.running_win_pl != self.win || row.running_place_pl != self.place;
        row.running_win_pl = self.win;
        row.running_place_pl = self.place;
        changed
    }
}

/// Outcome of one recomputation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeSummary {
    /// Strategy used.
    pub strategy: RecomputeStrategy,
    /// Rows visited.
    pub rows_walked: usize,
    /// Indices (into the walked slice) whose running totals changed.
    pub changed: Vec<usize>,
    /// Totals after the last walked row.
    #[serde(skip)]
    pub closing: RunningTotals,
}

impl RecomputeSummary {
    /// Number of rows whose totals changed.
    #[must_use]
    pub fn rows_changed(&self) -> usize {
        self.changed.len()
    }
}

fn walk(seed: RunningTotals, rows: &mut [Selection], strategy: RecomputeStrategy) -> RecomputeSummary {
    debug_assert!(
        rows.windows(2).all(|w| w[0].row_order < w[1].row_order),
        "rows must be in ascending row_order"
    );

    let mut totals = seed;
    let mut changed = Vec::new();
    for (idx, row) in rows.iter_mut().enumerate() {
        totals.add(row);
        if totals.stamp(row) {
            changed.push(idx);
        }
    }

    RecomputeSummary {
        strategy,
        rows_walked: rows.len(),
        changed,
        closing: totals,
    }
}

/// Recomputes every row of a system's ledger in one ascending pass.
///
/// `rows` must be the complete ledger of one system, ordered by `row_order`.
pub fn recompute_full(rows: &mut [Selection]) -> RecomputeSummary {
    walk(RunningTotals::ZERO, rows, RecomputeStrategy::Full)
}

/// Recomputes a contiguous suffix of a system's ledger.
///
/// `seed` must be the recorded totals of the row immediately before
/// `rows[0]` (see [`RunningTotals::seed`]).
pub fn recompute_suffix(seed: RunningTotals, rows: &mut [Selection]) -> RecomputeSummary {
    walk(seed, rows, RecomputeStrategy::Incremental)
}
