//! CSV ingestion for settlement feeds.
//!
//! Maps the header aliases used by the usual results exports onto the
//! canonical feed columns and hands the rows to the reconciliation engine
//! as a [`FeedBatch`]. Columns that map to nothing are dropped.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use racing_ledger_reconcile::{columns, FeedBatch, RawFeedRow};

/// Header aliases, normalized (lower-case, `_` for spaces and dashes).
const ALIASES: &[(&str, &[&str])] = &[
    (columns::DATE, &["date", "race_date", "racedate", "event_date", "date_iso"]),
    (columns::TIME, &["time", "race_time", "off", "off_time"]),
    (columns::HORSE, &["horse", "horse_name", "selection", "selection_name", "runner"]),
    (columns::WIN_BSP, &["win_bsp", "winbsp", "bsp", "win_sp"]),
    (
        columns::WIN_LAY_RETURN,
        &["win_lay_return", "win_lay", "lay_return", "win_return"],
    ),
    (columns::PLACE_BSP, &["place_bsp", "placebsp", "place_sp"]),
    (
        columns::PLACE_LAY_RETURN,
        &["place_lay_return", "place_lay", "place_return"],
    ),
    (columns::STATUS, &["status", "result", "outcome"]),
];

/// Canonical column for a CSV header, if it is one we read.
#[must_use]
pub fn canonical_column(header: &str) -> Option<&'static str> {
    let normalized: String = header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();

    ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&normalized.as_str()))
        .map(|(canonical, _)| *canonical)
}

/// Reads a settlement feed from a CSV file.
///
/// # Errors
/// Returns an error if the file cannot be opened or is not valid CSV.
pub fn read_feed(path: &Path) -> Result<FeedBatch> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open feed file: {}", path.display()))?;
    read_feed_from(file).with_context(|| format!("Failed to read feed file: {}", path.display()))
}

/// Reads a settlement feed from any CSV source.
///
/// # Errors
/// Returns an error if the input is not valid CSV.
pub fn read_feed_from<R: Read>(input: R) -> Result<FeedBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    // Position in the record -> canonical column. First header wins.
    let mut mapping: Vec<(usize, &'static str)> = Vec::new();
    for (idx, header) in reader.headers().context("Failed to read CSV header")?.iter().enumerate() {
        match canonical_column(header) {
            Some(canonical) if !mapping.iter().any(|(_, c)| *c == canonical) => {
                mapping.push((idx, canonical));
            }
            Some(_) => tracing::warn!(header, "Duplicate feed column ignored"),
            None => tracing::debug!(header, "Unrecognized feed column ignored"),
        }
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV record {}", idx + 1))?;
        let line = record
            .position()
            .and_then(|p| usize::try_from(p.line()).ok())
            .unwrap_or(idx + 2);
        let fields: HashMap<String, String> = mapping
            .iter()
            .map(|(pos, canonical)| {
                ((*canonical).to_string(), record.get(*pos).unwrap_or_default().to_string())
            })
            .collect();
        rows.push(RawFeedRow { line, fields });
    }

    Ok(FeedBatch {
        columns: mapping.iter().map(|(_, c)| (*c).to_string()).collect(),
        rows,
    })
}
