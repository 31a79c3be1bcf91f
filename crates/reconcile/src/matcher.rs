//! Settlement matcher.
//!
//! Pairs parsed feed rows with open selections on a normalized composite key
//! of race date, off time and horse name. The same horse may be selected by
//! several systems, so one feed row settles every open selection under its
//! key. The first feed row to claim a key wins; later rows with the same key
//! are reported as duplicates and never overwrite the first.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use racing_ledger_core::{settle, LedgerConfig, PlError, RaceResult, SettledPl, SystemProfile};
use racing_ledger_data::Selection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::feed::{FeedRow, RowError};

// =============================================================================
// Match key
// =============================================================================

/// Normalized composite key used to pair feed rows with selections.
///
/// - `time` is `HH:MM`: seconds are dropped, the hour is zero-padded, and
///   `.` is accepted as a separator (`2.05`, `14:30:00` and `02:05` all
///   normalize).
/// - `horse` is trimmed, lower-cased, with inner whitespace runs collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    /// Race date.
    pub date: NaiveDate,
    /// Normalized off time.
    pub time: String,
    /// Normalized horse name.
    pub horse: String,
}

impl MatchKey {
    /// Builds a key, or `None` if the time is unparseable or the name empty.
    #[must_use]
    pub fn new(date: NaiveDate, time: &str, horse: &str) -> Option<Self> {
        let time = Self::normalize_time(time)?;
        let horse = Self::normalize_horse(horse);
        if horse.is_empty() {
            return None;
        }
        Some(Self { date, time, horse })
    }

    /// Key of a stored selection.
    #[must_use]
    pub fn for_selection(selection: &Selection) -> Option<Self> {
        Self::new(selection.date, &selection.time, &selection.horse)
    }

    /// Normalizes an off time to `HH:MM`.
    #[must_use]
    pub fn normalize_time(time: &str) -> Option<String> {
        let time = time.trim().replace('.', ":");
        let parts: Vec<&str> = time.split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return None;
        }

        let field = |raw: &str, max_len: usize, max: u32| -> Option<u32> {
            if raw.is_empty() || raw.len() > max_len || !raw.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            raw.parse::<u32>().ok().filter(|v| *v <= max)
        };

        let hour = field(parts[0], 2, 23)?;
        if parts[1].len() != 2 {
            return None;
        }
        let minute = field(parts[1], 2, 59)?;
        if let Some(seconds) = parts.get(2) {
            field(seconds, 2, 59)?;
        }

        Some(format!("{hour:02}:{minute:02}"))
    }

    /// Normalizes a horse name for comparison.
    #[must_use]
    pub fn normalize_horse(horse: &str) -> String {
        horse
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.date, self.time, self.horse)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Matching thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// A win price must be strictly above this to count as a settlement
    /// price. Zero, absent and evens-or-below prices mean the market has not
    /// settled yet.
    pub min_settlement_price: Decimal,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_settlement_price: Decimal::ONE,
        }
    }
}

impl MatchConfig {
    /// Returns true if `row` carries enough to settle a selection.
    ///
    /// An explicit void-like status settles without a price.
    #[must_use]
    pub fn is_settleable(&self, row: &FeedRow) -> bool {
        if row.status.is_some_and(|s| s.is_void()) {
            return true;
        }
        row.win_bsp.is_some_and(|price| price > self.min_settlement_price)
    }
}

/// Derives the race result a feed row signals.
///
/// An explicit status wins. Otherwise a negative win lay return means the
/// horse won; a negative place lay return with a positive win lay return
/// means it placed (only for systems laying the place market, else lost).
#[must_use]
pub fn derive_result(row: &FeedRow, place_market: bool) -> RaceResult {
    if let Some(status) = row.status {
        return status;
    }

    let negative = |v: Option<Decimal>| v.is_some_and(|v| v < Decimal::ZERO);
    let positive = |v: Option<Decimal>| v.is_some_and(|v| v > Decimal::ZERO);

    if negative(row.win_lay_return) {
        RaceResult::Won
    } else if place_market && negative(row.place_lay_return) && positive(row.win_lay_return) {
        RaceResult::Placed
    } else {
        RaceResult::Lost
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// A settlement the matcher proposes for one selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedSettlement {
    /// Selection as read during matching.
    pub selection: Selection,
    /// Feed line that matched.
    pub feed_line: usize,
    /// Derived result.
    pub result: RaceResult,
    /// Win price from the feed.
    pub win_bsp: Option<Decimal>,
    /// Place price from the feed.
    pub place_bsp: Option<Decimal>,
    /// P/L priced against the selection as read during matching.
    pub pl: SettledPl,
}

impl ProposedSettlement {
    /// Selection identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.selection.id
    }

    /// System the selection belongs to.
    #[must_use]
    pub fn system_id(&self) -> &str {
        &self.selection.system_id
    }

    /// Prices and attaches the result to `row`.
    ///
    /// Feed prices take precedence; a price missing from the feed falls back
    /// to the one already on the row.
    ///
    /// # Errors
    /// Returns a [`PlError`] if the result cannot be priced; `row` is left
    /// untouched.
    pub fn apply_to(
        &self,
        row: &mut Selection,
        profile: &SystemProfile,
        now: DateTime<Utc>,
    ) -> Result<SettledPl, PlError> {
        let win_bsp = self.win_bsp.or(row.win_bsp);
        let place_bsp = self.place_bsp.or(row.place_bsp);
        let pl = settle(self.result, win_bsp, place_bsp, profile)?;
        row.apply_result(self.result, win_bsp, place_bsp, pl, now);
        Ok(pl)
    }
}

/// Why a feed row matched nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum UnmatchedReason {
    /// No open selection under the key.
    NoCandidate,
    /// An earlier row in the batch already claimed the key.
    Duplicate {
        /// Line of the row that claimed it.
        first_line: usize,
    },
}

/// A feed row that settled nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedFeedRow {
    /// Source line.
    pub line: usize,
    /// Race date.
    pub date: NaiveDate,
    /// Off time as published.
    pub time: String,
    /// Horse as published.
    pub horse: String,
    /// Why.
    #[serde(flatten)]
    pub reason: UnmatchedReason,
}

impl UnmatchedFeedRow {
    fn new(row: &FeedRow, reason: UnmatchedReason) -> Self {
        Self {
            line: row.line,
            date: row.date,
            time: row.time.clone(),
            horse: row.horse.clone(),
            reason,
        }
    }
}

/// Reference to a selection in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRef {
    /// Selection identifier.
    pub id: Uuid,
    /// Owning system.
    pub system_id: String,
    /// Ledger position.
    pub row_order: i64,
    /// Race date.
    pub date: NaiveDate,
    /// Off time.
    pub time: String,
    /// Horse.
    pub horse: String,
}

impl From<&Selection> for SelectionRef {
    fn from(selection: &Selection) -> Self {
        Self {
            id: selection.id,
            system_id: selection.system_id.clone(),
            row_order: selection.row_order,
            date: selection.date,
            time: selection.time.clone(),
            horse: selection.horse.clone(),
        }
    }
}

/// A matched selection whose race has not settled yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotYetSettled {
    /// The selection.
    #[serde(flatten)]
    pub selection: SelectionRef,
    /// Feed line that matched it.
    pub feed_line: usize,
}

/// Everything the matcher decided about one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Settlements to apply, in feed order.
    pub accepted: Vec<ProposedSettlement>,
    /// Feed rows that settled nothing.
    pub unmatched_feed_rows: Vec<UnmatchedFeedRow>,
    /// Open selections no feed row matched.
    pub unmatched_selections: Vec<SelectionRef>,
    /// Matched selections left open because the race has no settlement price.
    pub not_yet_settled: Vec<NotYetSettled>,
    /// Matched rows whose result could not be priced.
    pub errors: Vec<RowError>,
}

// =============================================================================
// Matcher
// =============================================================================

/// Pairs feed rows with open selections.
#[derive(Debug, Clone, Copy)]
pub struct SettlementMatcher<'a> {
    config: MatchConfig,
    ledger: &'a LedgerConfig,
}

impl<'a> SettlementMatcher<'a> {
    /// Creates a matcher using `ledger` for per-system market setup.
    #[must_use]
    pub fn new(config: MatchConfig, ledger: &'a LedgerConfig) -> Self {
        Self { config, ledger }
    }

    /// Matches `rows` against `open`, which must hold the unresulted
    /// selections for every date in the feed.
    #[must_use]
    pub fn match_feed(&self, rows: &[FeedRow], open: Vec<Selection>) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();

        let mut index: HashMap<MatchKey, Vec<Selection>> = HashMap::new();
        let mut keyless = Vec::new();
        for selection in open {
            match MatchKey::for_selection(&selection) {
                Some(key) => index.entry(key).or_default().push(selection),
                None => keyless.push(selection),
            }
        }

        let mut claimed: HashMap<MatchKey, usize> = HashMap::new();
        for row in rows {
            let Some(key) = row.key() else {
                outcome
                    .unmatched_feed_rows
                    .push(UnmatchedFeedRow::new(row, UnmatchedReason::NoCandidate));
                continue;
            };

            if let Some(&first_line) = claimed.get(&key) {
                warn!(line = row.line, first_line, key = %key, "Duplicate feed row");
                outcome
                    .unmatched_feed_rows
                    .push(UnmatchedFeedRow::new(row, UnmatchedReason::Duplicate { first_line }));
                continue;
            }

            let Some(candidates) = index.get(&key) else {
                debug!(line = row.line, key = %key, "No open selection for feed row");
                outcome
                    .unmatched_feed_rows
                    .push(UnmatchedFeedRow::new(row, UnmatchedReason::NoCandidate));
                continue;
            };
            claimed.insert(key, row.line);

            let settleable = self.config.is_settleable(row);
            for selection in candidates {
                if settleable {
                    self.propose(row, selection, &mut outcome);
                } else {
                    debug!(line = row.line, selection = %selection.id, "Race not yet settled");
                    outcome.not_yet_settled.push(NotYetSettled {
                        selection: SelectionRef::from(selection),
                        feed_line: row.line,
                    });
                }
            }
        }

        let claimed_keys: HashSet<&MatchKey> = claimed.keys().collect();
        let mut unmatched: Vec<&Selection> = index
            .iter()
            .filter(|(key, _)| !claimed_keys.contains(key))
            .flat_map(|(_, selections)| selections)
            .chain(keyless.iter())
            .collect();
        unmatched.sort_by(|a, b| {
            a.system_id
                .cmp(&b.system_id)
                .then(a.row_order.cmp(&b.row_order))
        });
        outcome.unmatched_selections = unmatched.into_iter().map(SelectionRef::from).collect();

        outcome
    }

    fn propose(&self, row: &FeedRow, selection: &Selection, outcome: &mut MatchOutcome) {
        let profile = self.ledger.profile_for(&selection.system_id);
        let mut proposal = ProposedSettlement {
            selection: selection.clone(),
            feed_line: row.line,
            result: derive_result(row, profile.place_market),
            win_bsp: row.win_bsp,
            place_bsp: row.place_bsp,
            pl: SettledPl {
                win_pl: Decimal::ZERO,
                place_pl: None,
            },
        };

        let mut priced = selection.clone();
        let at = selection.updated_at;
        match proposal.apply_to(&mut priced, &profile, at) {
            Ok(pl) => {
                debug!(
                    line = row.line,
                    selection = %selection.id,
                    system_id = %selection.system_id,
                    result = %proposal.result,
                    win_pl = %pl.win_pl,
                    "Proposed settlement"
                );
                proposal.pl = pl;
                outcome.accepted.push(proposal);
            }
            Err(e) => {
                warn!(line = row.line, selection = %selection.id, error = %e, "Cannot price result");
                outcome.errors.push(RowError {
                    line: row.line,
                    column: None,
                    message: format!(
                        "{} (system {}, row {}): {e}",
                        selection.horse, selection.system_id, selection.row_order
                    ),
                });
            }
        }
    }
}
