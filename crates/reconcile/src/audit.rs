//! Ledger invariant auditor.
//!
//! Checks a system's ledger for unique ascending `row_order`, correct running
//! totals, P/L consistent with the stored result and prices, and coherent
//! result flags. Reports every violating row instead of stopping at the
//! first one.

use racing_ledger_core::{settle, SystemProfile};
use racing_ledger_data::Selection;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::recompute::RunningTotals;

/// What is wrong with a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ViolationKind {
    /// Another row of the system holds the same position.
    DuplicateRowOrder,
    /// Rows were not delivered in ascending `row_order`.
    OutOfOrder {
        /// `row_order` of the row before this one.
        previous: i64,
    },
    /// `running_win_pl` differs from the prefix sum.
    RunningWin {
        /// Prefix sum.
        expected: Decimal,
        /// Stored value.
        found: Decimal,
    },
    /// `running_place_pl` differs from the prefix sum.
    RunningPlace {
        /// Prefix sum (`None` before the first place-bearing row).
        expected: Option<Decimal>,
        /// Stored value.
        found: Option<Decimal>,
    },
    /// Stored P/L differs from what the result and prices produce.
    PlMismatch {
        /// Win P/L derived from the result.
        expected_win: Decimal,
        /// Place P/L derived from the result.
        expected_place: Option<Decimal>,
    },
    /// The stored result cannot be priced at all.
    Unpriceable {
        /// Pricing error.
        reason: String,
    },
    /// Result flag, result and P/L disagree with each other.
    StaleResult,
}

/// One violating row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Row identifier.
    pub id: Uuid,
    /// Row position.
    pub row_order: i64,
    /// Failure.
    #[serde(flatten)]
    pub kind: ViolationKind,
}

/// Audits one system's ledger, ordered as loaded from the store.
#[must_use]
pub fn audit(rows: &[Selection], profile: &SystemProfile) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut totals = RunningTotals::ZERO;
    let mut previous: Option<i64> = None;

    for row in rows {
        let mut flag = |kind| {
            violations.push(Violation {
                id: row.id,
                row_order: row.row_order,
                kind,
            });
        };

        match previous {
            Some(prev) if prev == row.row_order => flag(ViolationKind::DuplicateRowOrder),
            Some(prev) if prev > row.row_order => flag(ViolationKind::OutOfOrder { previous: prev }),
            _ => {}
        }
        previous = Some(row.row_order);

        if row.has_result {
            match row.result {
                Some(result) => match settle(result, row.win_bsp, row.place_bsp, profile) {
                    Ok(pl) => {
                        if row.win_pl != Some(pl.win_pl) || row.place_pl != pl.place_pl {
                            flag(ViolationKind::PlMismatch {
                                expected_win: pl.win_pl,
                                expected_place: pl.place_pl,
                            });
                        }
                    }
                    Err(e) => flag(ViolationKind::Unpriceable {
                        reason: e.to_string(),
                    }),
                },
                None => flag(ViolationKind::StaleResult),
            }
        } else if row.result.is_some() || row.win_pl.is_some() || row.place_pl.is_some() {
            flag(ViolationKind::StaleResult);
        }

        totals.add(row);
        if row.running_win_pl != totals.win {
            flag(ViolationKind::RunningWin {
                expected: totals.win,
                found: row.running_win_pl,
            });
        }
        if row.running_place_pl != totals.place {
            flag(ViolationKind::RunningPlace {
                expected: totals.place,
                found: row.running_place_pl,
            });
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recompute::recompute_full;
    use crate::test_support::{open_row, settled_row};
    use racing_ledger_core::{PlConfig, RaceResult};
    use rust_decimal_macros::dec;

    fn profile() -> SystemProfile {
        SystemProfile::default()
    }

    #[test]
    fn test_consistent_ledger_has_no_violations() {
        let mut rows = vec![settled_row(1, dec!(0.98), None), open_row(2), settled_row(4, dec!(0.98), None)];
        recompute_full(&mut rows);
        assert!(audit(&rows, &profile()).is_empty());
    }

    #[test]
    fn test_detects_broken_running_win() {
        let mut rows = vec![settled_row(1, dec!(0.98), None), settled_row(2, dec!(0.98), None)];
        recompute_full(&mut rows);
        rows[1].running_win_pl = dec!(5);

        let violations = audit(&rows, &profile());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].row_order, 2);
        assert_eq!(
            violations[0].kind,
            ViolationKind::RunningWin {
                expected: dec!(1.96),
                found: dec!(5)
            }
        );
    }

    #[test]
    fn test_detects_place_boundary_violation() {
        let place = SystemProfile::with_place_market(PlConfig::default());
        let mut rows = vec![open_row(1), settled_row(2, dec!(0.98), Some(dec!(0.98)))];
        recompute_full(&mut rows);
        rows[0].running_place_pl = Some(Decimal::ZERO);

        let violations = audit(&rows, &place);
        assert!(violations.iter().any(|v| matches!(
            v.kind,
            ViolationKind::RunningPlace { expected: None, .. }
        )));
    }

    #[test]
    fn test_detects_hand_edited_pl() {
        let mut rows = vec![settled_row(1, dec!(0.5), None)];
        recompute_full(&mut rows);

        let violations = audit(&rows, &profile());
        assert_eq!(
            violations[0].kind,
            ViolationKind::PlMismatch {
                expected_win: dec!(0.98),
                expected_place: None
            }
        );
    }

    #[test]
    fn test_detects_unpriceable_win() {
        let mut row = settled_row(1, dec!(-2.0), None);
        row.result = Some(RaceResult::Won);
        let mut rows = vec![row];
        recompute_full(&mut rows);

        let violations = audit(&rows, &profile());
        assert!(matches!(violations[0].kind, ViolationKind::Unpriceable { .. }));
    }

    #[test]
    fn test_detects_order_problems() {
        let rows = vec![open_row(3), open_row(3), open_row(2)];
        let kinds: Vec<ViolationKind> = audit(&rows, &profile()).into_iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ViolationKind::DuplicateRowOrder,
                ViolationKind::OutOfOrder { previous: 3 }
            ]
        );
    }

    #[test]
    fn test_detects_pl_on_open_row() {
        let mut row = open_row(1);
        row.win_pl = Some(dec!(0.98));
        assert_eq!(audit(&[row], &profile())[0].kind, ViolationKind::StaleResult);
    }
}
