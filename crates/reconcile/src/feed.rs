//! Settlement feed validation and row parsing.
//!
//! The ingestion side hands over a [`FeedBatch`]: canonical column names and
//! raw string cells keyed by column, with the source line of every row. A
//! batch missing a required column is rejected as a whole. Individual rows
//! that fail to parse become [`RowError`]s and the rest of the batch goes on.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::NaiveDate;
use racing_ledger_core::RaceResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::MatchKey;

// =============================================================================
// Columns
// =============================================================================

/// Canonical feed column names.
pub mod columns {
    /// Race date.
    pub const DATE: &str = "date";
    /// Scheduled off time.
    pub const TIME: &str = "time";
    /// Horse name.
    pub const HORSE: &str = "horse";
    /// Win-market starting price.
    pub const WIN_BSP: &str = "win_bsp";
    /// Return on a one-unit win lay (negative when the horse won).
    pub const WIN_LAY_RETURN: &str = "win_lay_return";
    /// Place-market starting price.
    pub const PLACE_BSP: &str = "place_bsp";
    /// Return on a one-unit place lay (negative when the horse placed).
    pub const PLACE_LAY_RETURN: &str = "place_lay_return";
    /// Explicit result signal (`NR`, `VOID`, `CANCELLED`, ...).
    pub const STATUS: &str = "status";

    /// Columns every batch must carry.
    pub const REQUIRED: [&str; 5] = [DATE, TIME, HORSE, WIN_BSP, WIN_LAY_RETURN];

    /// Columns read when present.
    pub const OPTIONAL: [&str; 3] = [PLACE_BSP, PLACE_LAY_RETURN, STATUS];
}

// =============================================================================
// Raw input
// =============================================================================

/// One raw feed row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFeedRow {
    /// Line in the source document (header is line 1).
    pub line: usize,
    /// Cells keyed by canonical column name.
    pub fields: HashMap<String, String>,
}

impl RawFeedRow {
    /// Cell of a canonical column. Keys are matched the way the schema check
    /// matches column names.
    fn cell(&self, column: &str) -> &str {
        self.fields
            .get(column)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|(name, _)| same_column(name, column))
                    .map(|(_, value)| value)
            })
            .map_or("", |v| v.trim())
    }
}

/// Column names compare trimmed and case-insensitively.
fn same_column(name: &str, canonical: &str) -> bool {
    name.trim().eq_ignore_ascii_case(canonical)
}

/// A column-mapped settlement batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedBatch {
    /// Column names present in the batch, canonical and lower-case.
    pub columns: Vec<String>,
    /// Data rows.
    pub rows: Vec<RawFeedRow>,
}

impl FeedBatch {
    /// Builds a batch from a header and positional records.
    ///
    /// Records are numbered from line 2. Cells beyond the header are ignored;
    /// missing trailing cells read as empty.
    #[must_use]
    pub fn from_records<I, R>(columns: &[&str], records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        let columns: Vec<String> = columns.iter().map(|c| c.trim().to_lowercase()).collect();
        let rows = records
            .into_iter()
            .enumerate()
            .map(|(idx, record)| RawFeedRow {
                line: idx + 2,
                fields: columns.iter().cloned().zip(record.into_iter().map(Into::into)).collect(),
            })
            .collect();

        Self { columns, rows }
    }

    /// Returns true if the batch carries `column`.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| same_column(c, column))
    }
}

// =============================================================================
// Parsed output
// =============================================================================

/// A typed settlement feed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRow {
    /// Source line.
    pub line: usize,
    /// Race date.
    pub date: NaiveDate,
    /// Off time as published.
    pub time: String,
    /// Horse name as published.
    pub horse: String,
    /// Win-market starting price.
    pub win_bsp: Option<Decimal>,
    /// Place-market starting price.
    pub place_bsp: Option<Decimal>,
    /// Win lay return.
    pub win_lay_return: Option<Decimal>,
    /// Place lay return.
    pub place_lay_return: Option<Decimal>,
    /// Explicit result signal.
    pub status: Option<RaceResult>,
}

impl FeedRow {
    /// Composite match key of this row.
    #[must_use]
    pub fn key(&self) -> Option<MatchKey> {
        MatchKey::new(self.date, &self.time, &self.horse)
    }
}

/// A row that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    /// Source line.
    pub line: usize,
    /// Offending column, when one can be named.
    pub column: Option<String>,
    /// What went wrong.
    pub message: String,
}

impl RowError {
    fn at(line: usize, column: &str, message: impl Into<String>) -> Self {
        Self {
            line,
            column: Some(column.to_string()),
            message: message.into(),
        }
    }
}

/// Result of parsing a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    /// Rows that parsed.
    pub rows: Vec<FeedRow>,
    /// Rows that did not.
    pub errors: Vec<RowError>,
}

impl ParsedFeed {
    /// Distinct race dates among the parsed rows.
    #[must_use]
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|row| row.date).collect()
    }
}

/// Batch-level feed errors. Any of these aborts the batch before mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Required columns are absent from the header.
    #[error("feed is missing required columns: {}", missing.join(", "))]
    MissingColumns {
        /// Names of the absent columns.
        missing: Vec<String>,
    },
}

// =============================================================================
// Parsing
// =============================================================================

/// Checks that every required column is present.
///
/// # Errors
/// Returns [`FeedError::MissingColumns`] listing every absent column.
pub fn validate_schema(columns: &[String]) -> Result<(), FeedError> {
    let missing: Vec<String> = columns::REQUIRED
        .iter()
        .filter(|required| !columns.iter().any(|c| same_column(c, required)))
        .map(|c| (*c).to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(FeedError::MissingColumns { missing })
    }
}

/// Parses a batch, collecting row errors.
///
/// # Errors
/// Returns a [`FeedError`] if the schema is invalid. Row-level failures are
/// returned inside [`ParsedFeed::errors`].
pub fn parse_batch(batch: &FeedBatch) -> Result<ParsedFeed, FeedError> {
    validate_schema(&batch.columns)?;

    let mut parsed = ParsedFeed::default();
    for raw in &batch.rows {
        match parse_row(raw) {
            Ok(row) => parsed.rows.push(row),
            Err(errors) => {
                tracing::debug!(line = raw.line, errors = errors.len(), "Rejected feed row");
                parsed.errors.extend(errors);
            }
        }
    }

    Ok(parsed)
}

/// Parses one raw row. Every bad cell is reported.
///
/// # Errors
/// Returns the list of cell errors if any cell is invalid.
pub fn parse_row(raw: &RawFeedRow) -> Result<FeedRow, Vec<RowError>> {
    let mut errors = Vec::new();
    let line = raw.line;

    let date = match parse_date(raw.cell(columns::DATE)) {
        Some(date) => Some(date),
        None => {
            errors.push(RowError::at(
                line,
                columns::DATE,
                format!("invalid date '{}'", raw.cell(columns::DATE)),
            ));
            None
        }
    };

    let time = raw.cell(columns::TIME);
    if MatchKey::normalize_time(time).is_none() {
        errors.push(RowError::at(line, columns::TIME, format!("invalid time '{time}'")));
    }

    let horse = raw.cell(columns::HORSE);
    if horse.is_empty() {
        errors.push(RowError::at(line, columns::HORSE, "horse name is empty"));
    }

    let mut decimal = |column: &str| match parse_decimal(raw.cell(column)) {
        Ok(value) => value,
        Err(message) => {
            errors.push(RowError::at(line, column, message));
            None
        }
    };
    let win_bsp = decimal(columns::WIN_BSP);
    let place_bsp = decimal(columns::PLACE_BSP);
    let win_lay_return = decimal(columns::WIN_LAY_RETURN);
    let place_lay_return = decimal(columns::PLACE_LAY_RETURN);

    let status_cell = raw.cell(columns::STATUS);
    let status = if status_cell.is_empty() {
        None
    } else {
        let parsed = RaceResult::parse(status_cell);
        if parsed.is_none() {
            errors.push(RowError::at(
                line,
                columns::STATUS,
                format!("unknown status '{status_cell}'"),
            ));
        }
        parsed
    };

    match date {
        Some(date) if errors.is_empty() => Ok(FeedRow {
            line,
            date,
            time: time.to_string(),
            horse: horse.to_string(),
            win_bsp,
            place_bsp,
            win_lay_return,
            place_lay_return,
            status,
        }),
        _ => Err(errors),
    }
}

/// Parses a race date: `YYYY-MM-DD`, `DD/MM/YYYY`, or an ISO date-time
/// whose date part is one of those.
#[must_use]
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date_part = value.split(['T', ' ']).next().unwrap_or(value);

    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d/%m/%Y"))
        .ok()
}

/// Parses an optional decimal cell. Empty cells are `None`.
///
/// # Errors
/// Returns a message if the cell is not empty and not a decimal number.
pub fn parse_decimal(value: &str) -> Result<Option<Decimal>, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map(Some)
        .map_err(|_| format!("invalid number '{value}'"))
}
